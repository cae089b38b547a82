//! Prompt construction for interview turns and evaluation. Pure
//! functions, deterministic given their inputs.

use mockstage_schema::{Difficulty, InterviewConfig, InterviewType, Message, Role};

/// Sentinel the interviewer is told to emit once every question has been
/// asked and answered. It never drives a state transition; only an
/// explicit evaluate call closes a session.
pub const INTERVIEW_COMPLETE: &str = "INTERVIEW_COMPLETE";

/// Synthetic first user message. The transcript stores only interviewer
/// and candidate messages, so every replay to the model is prefixed with
/// this opener to keep the user/assistant alternation wire-valid.
pub const OPENING_MESSAGE: &str =
    "Please introduce yourself briefly and ask your first question.";

fn focus_area(interview_type: InterviewType) -> &'static str {
    match interview_type {
        InterviewType::GeneralEngineering => {
            "general software engineering: coding practices, debugging, testing, tooling"
        }
        InterviewType::SystemDesign => {
            "system design: architecture, scalability, data modeling, tradeoff analysis"
        }
        InterviewType::DomainSpecific => {
            "the candidate's stated specialty domain, probing depth over breadth"
        }
        InterviewType::MlTheory => {
            "machine learning theory: model families, training dynamics, evaluation, failure modes"
        }
        InterviewType::Mixed => {
            "a mix of coding, system design, and machine learning topics"
        }
    }
}

fn difficulty_calibration(difficulty: Difficulty) -> &'static str {
    match difficulty {
        Difficulty::Easy => "entry level: fundamentals, give generous hints",
        Difficulty::Medium => "mid level: practical depth, occasional follow-up probing",
        Difficulty::Hard => "senior level: probe tradeoffs and edge cases relentlessly",
        Difficulty::Expert => "staff/principal level: open-ended problems, expect rigor",
    }
}

pub fn start_prompt(config: &InterviewConfig) -> String {
    format!(
        "You are a senior technical interviewer conducting a {difficulty} mock interview \
focused on {focus}.\nYou will ask {count} questions total, one at a time.\n\n\
Interview rules:\n\
1. Ask ONE question at a time and wait for the candidate's response.\n\
2. After each answer, briefly note strengths and gaps, then ask a follow-up or the next question.\n\
3. Probe deeper when answers stay on the surface: ask why, how it fails, what the tradeoffs are.\n\
4. Be encouraging but honest.\n\
5. Number your questions (e.g. \"Question 2 of {count}\").\n\
6. When all {count} questions have been asked and answered, say {sentinel} and nothing else.",
        difficulty = difficulty_calibration(config.difficulty),
        focus = focus_area(config.interview_type),
        count = config.question_count,
        sentinel = INTERVIEW_COMPLETE,
    )
}

/// System prompt for a follow-up turn. Question progress is recovered
/// from the transcript alone by counting interviewer messages; there is
/// no separate counter to drift out of sync.
pub fn turn_prompt(transcript: &[Message], config: &InterviewConfig) -> String {
    let asked = transcript
        .iter()
        .filter(|m| m.role == Role::Interviewer)
        .count();
    format!(
        "{base}\n\nYou have already sent {asked} interviewer message(s). React to the \
candidate's last answer: briefly assess it, then ask a follow-up or the next main \
question, staying within {count} main questions total.",
        base = start_prompt(config),
        asked = asked,
        count = config.question_count,
    )
}

pub fn render_transcript(transcript: &[Message]) -> String {
    transcript
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| {
            let who = match m.role {
                Role::Interviewer => "Interviewer",
                Role::Candidate => "Candidate",
                Role::System => unreachable!(),
            };
            format!("{who}: {}", m.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Evaluation prompt. The instructed JSON shape is the contract with the
/// evaluation parser; keep the two in lockstep.
pub fn evaluation_prompt(transcript: &[Message], config: &InterviewConfig) -> String {
    format!(
        "You are evaluating a mock technical interview.\n\
Focus area: {focus}\nDifficulty: {difficulty:?}\n\n\
Transcript:\n{transcript}\n\n\
Evaluate the candidate and return ONLY valid JSON with this exact structure:\n\
{{\n\
    \"overall_score\": <number 0-10>,\n\
    \"correctness\": <number 0-10>,\n\
    \"depth\": <number 0-10>,\n\
    \"communication\": <number 0-10>,\n\
    \"strengths\": [\"...\"],\n\
    \"areas_to_improve\": [\"...\"],\n\
    \"recommendations\": [\"...\"]\n\
}}",
        focus = focus_area(config.interview_type),
        difficulty = config.difficulty,
        transcript = render_transcript(transcript),
    )
}

/// Strict second attempt after an unparseable evaluation response.
pub fn reformat_prompt(previous_answer: &str) -> String {
    format!(
        "Your previous answer could not be parsed. Reformat it as valid JSON with exactly \
these keys: overall_score, correctness, depth, communication (numbers between 0 and 10), \
strengths, areas_to_improve, recommendations (arrays of strings). Output the JSON object \
and nothing else.\n\nPrevious answer:\n{previous_answer}"
    )
}
