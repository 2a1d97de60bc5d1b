//! Prompt builders for every pipeline agent. The prompts are text-heavy, so
//! they live here instead of inside the orchestrator or the state service.

use courseforge_schema::{ChapterPlan, CourseRequest};

/// System instruction templates; `{field}` placeholders are filled from the
/// working-state snapshot at call time.
pub mod instructions {
    pub const INFO: &str = "You are the intake step of a course builder. Given the learner's goal \
         and any uploaded material, produce a concise course title (at most eight words) and a \
         two-sentence description. Respond with a JSON object {\"title\": ..., \"description\": ...}.";

    pub const PLANNER: &str = "You are the curriculum planner of a course builder. Break the \
         learner's goal into chapters that fit the requested time budget. Respond with a JSON \
         object {\"chapters\": [{\"caption\": ..., \"content\": [...], \"time\": ..., \"note\": ...}]} \
         where caption is 1-5 words, each content element is one bullet sentence and time is in \
         minutes.";

    pub const EXPLAINER: &str = "You build one interactive course chapter as a single \
         self-contained UI component. Output only the component source, starting with () => and \
         ending with a closing curly brace. Allowed globals: the React namespace, the Recharts \
         chart namespace and the Latex math renderer.\n\n\
         ## Current course creation state\n\
         Initial learner query: \"{query}\"\n\
         All chapters, created by the planner:\n{chapters_str}\n\
         Only cover the chapter assigned to you in the query that follows.";

    pub const CODE_REVIEW: &str = "Please debug the given component code, using the error \
         messages provided. Do not add features, just repair the existing code. Return ONLY the \
         component in the form () => {...}. Allowed globals: the React namespace, the Recharts \
         chart namespace and the Latex math renderer.";

    pub const TESTER: &str = "You write a graded question set for one course chapter. Produce a \
         JSON object {\"questions\": [...]} mixing multiple-choice questions (fields question, \
         answer_a..answer_d, correct_answer as one letter of a/b/c/d, explanation) and open-text \
         questions (fields question, correct_answer). Interactive questions may carry component \
         source in the question field, starting with () =>.";

    pub const GRADER: &str = "You grade one open-text answer. Award 0 points for a wrong answer, \
         1 for a partially right answer, 2 for a right answer. Respond with a JSON object \
         {\"points\": ..., \"explanation\": ...} where the explanation is one short sentence of \
         feedback.";

    pub const IMAGE: &str = "You pick an illustrative stock photo for a course topic. Respond \
         with a single https:// image URL and nothing else.";

    pub const CHAT: &str = "You are a study companion for one course chapter. Answer questions \
         about the chapter content below, stay on topic and keep answers short.\n\n\
         Chapter content:\n{chapter_content}";
}

pub fn info_query(
    request: &CourseRequest,
    document_previews: &[String],
    image_names: &[String],
) -> String {
    format!(
        "The following is the user query for creating a course / learning path:\n{}\n\
         The user uploaded the following documents:\n{}\n\
         Uploaded images: {:?}\n\
         Response Language: {}\n\
         Response Difficulty: {}",
        request.query,
        serde_json::to_string_pretty(document_previews).unwrap_or_default(),
        image_names,
        request.language,
        request.difficulty,
    )
}

pub fn planner_query(request: &CourseRequest) -> String {
    format!(
        "Question (System): What do you want to learn?\n\
         Answer (User): {}\n\
         Question (System): How many hours do you want to invest?\n\
         Answer (User): {}\n\
         Question (System): What language do you want to learn in?\n\
         Answer (User): {}\n\
         Question (System): What difficulty do you want to learn at?\n\
         Answer (User): {}",
        request.query, request.time_hours, request.language, request.difficulty,
    )
}

pub fn explainer_query(
    chapter_idx: usize,
    chapter: &ChapterPlan,
    language: &str,
    difficulty: &str,
    rag_context: &[String],
) -> String {
    format!(
        "Chapter {}:\n\
         Caption: {}\n\
         Time in Minutes: {}\n\
         Content Summary:\n{}\n\
         Note by Planner Agent: {}\n\
         Response Language: {language}\n\
         Response Difficulty: {difficulty}\n\n\
         The following additional information was uploaded by the user. They do not have it in \
         front of them, so spell out what you are referring to:\n{}",
        chapter_idx + 1,
        chapter.caption,
        chapter.time,
        serde_json::to_string_pretty(&chapter.content).unwrap_or_default(),
        chapter.note.as_deref().unwrap_or("none"),
        serde_json::to_string_pretty(rag_context).unwrap_or_default(),
    )
}

pub fn chapter_image_query(chapter: &ChapterPlan) -> String {
    format!(
        "Caption: {}\n\
         Content Summary:\n{}\n\
         Note by Planner Agent: {}",
        chapter.caption,
        serde_json::to_string_pretty(&chapter.content).unwrap_or_default(),
        chapter.note.as_deref().unwrap_or("none"),
    )
}

pub fn course_image_query(title: &str, description: &str) -> String {
    format!("Title: {title}, Description: {description}")
}

pub fn tester_query(
    chapter: &ChapterPlan,
    explanation: &str,
    language: &str,
    difficulty: &str,
) -> String {
    format!(
        "Title: {}\n\
         Time for Chapter: {} minutes\n\
         Full Chapter Content (component source):\n{}\n\
         Response Language: {language}\n\
         Response Difficulty: {difficulty}",
        chapter.caption,
        chapter.time,
        serde_json::to_string(explanation).unwrap_or_default(),
    )
}

pub fn grader_query(question: &str, correct_answer: &str, users_answer: &str) -> String {
    format!(
        "Practice Question: {question}\n\
         Correct Answer: {correct_answer}\n\
         User Answer: {users_answer}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CourseRequest {
        CourseRequest {
            query: "learn rust".into(),
            time_hours: 4,
            document_ids: vec![],
            picture_ids: vec![],
            language: "English".into(),
            difficulty: "Beginner".into(),
        }
    }

    fn chapter() -> ChapterPlan {
        ChapterPlan {
            caption: "Ownership".into(),
            content: vec!["moves".into(), "borrows".into()],
            time: 45,
            note: Some("mention lifetimes".into()),
        }
    }

    #[test]
    fn planner_query_carries_all_request_fields() {
        let q = planner_query(&request());
        assert!(q.contains("learn rust"));
        assert!(q.contains('4'));
        assert!(q.contains("English"));
        assert!(q.contains("Beginner"));
    }

    #[test]
    fn explainer_query_numbers_chapters_from_one() {
        let q = explainer_query(0, &chapter(), "English", "Beginner", &["context".into()]);
        assert!(q.starts_with("Chapter 1:"));
        assert!(q.contains("Ownership"));
        assert!(q.contains("mention lifetimes"));
        assert!(q.contains("context"));
    }

    #[test]
    fn explainer_query_handles_missing_note() {
        let mut plan = chapter();
        plan.note = None;
        let q = explainer_query(2, &plan, "English", "Beginner", &[]);
        assert!(q.starts_with("Chapter 3:"));
        assert!(q.contains("Note by Planner Agent: none"));
    }

    #[test]
    fn grader_query_embeds_all_three_parts() {
        let q = grader_query("What is a move?", "Transfer of ownership", "dunno");
        assert!(q.contains("What is a move?"));
        assert!(q.contains("Transfer of ownership"));
        assert!(q.contains("dunno"));
    }

    #[test]
    fn tester_query_json_escapes_the_component() {
        let q = tester_query(&chapter(), "() => { return \"x\"; }", "English", "Beginner");
        assert!(q.contains("\\\"x\\\""));
        assert!(q.contains("45 minutes"));
    }
}
