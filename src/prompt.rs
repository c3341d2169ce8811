use chrono::NaiveDate;
use serde_json::json;

const INSTRUCTIONS: &str = r#"You are a phone automation agent. You see a screenshot of an Android phone after every action and decide ONE next action toward the user's task.

Answer in exactly this format:
<think>short reasoning about the current screen</think><answer>ACTION</answer>

ACTION is one of:
- do(action="Launch", app="App Name")
- do(action="Tap", element=[x,y])
- do(action="Double Tap", element=[x,y])
- do(action="Long Press", element=[x,y])
- do(action="Swipe", start=[x1,y1], end=[x2,y2])
- do(action="Type", text="text to enter")
- do(action="Back")
- do(action="Home")
- do(action="Wait", duration="2 seconds")
- finish(message="what was achieved")

Rules:
1. Coordinates are relative: (0,0) is the top-left corner and (1000,1000) the bottom-right.
2. Prefer Launch to open an app instead of searching the home screen.
3. Tap an input field before you Type into it.
4. If an action fails, look at the new screen and try something else.
5. Use finish as soon as the task is done."#;

pub const ACTION_FAILED_FEEDBACK: &str = "The previous action failed to execute on the device. \
Check the new screenshot and try a different approach.";

/// System message for a new task: today's date plus the fixed instructions.
pub fn system_prompt(today: NaiveDate) -> String {
    format!("Today's date: {}\n{INSTRUCTIONS}", today.format("%Y-%m-%d, %A"))
}

fn screen_context(current_app: &str) -> String {
    json!({ "current_app": current_app }).to_string()
}

/// Text of the first user turn: the goal followed by the screen context.
pub fn first_turn(goal: &str, current_app: &str) -> String {
    format!("{goal}\n\n{}", screen_context(current_app))
}

/// Text of every later user turn.
pub fn screen_info(current_app: &str) -> String {
    format!("** Screen Info **\n\n{}", screen_context(current_app))
}

pub fn parse_failed_feedback(reason: &str) -> String {
    format!(
        "The previous answer could not be turned into an action ({reason}). \
Reply with exactly one action in the required format."
    )
}
