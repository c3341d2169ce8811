use crate::action::Action;

/// Write-only channel for progress shown to the user.
pub trait StatusSink: Send + Sync {
    fn update_status(&self, text: &str);

    fn set_task_running(&self, running: bool);
}

pub const THINKING: &str = "Thinking...";
pub const COMPLETED: &str = "Task completed";
pub const STOPPED: &str = "Stopped";

pub fn failed(reason: &str) -> String {
    format!("Error: {reason}")
}

pub fn max_steps_reached(max_steps: u32) -> String {
    format!("Task terminated: reached the maximum of {max_steps} steps")
}

/// Short, user-facing description of what is about to happen.
pub fn describe(action: &Action) -> String {
    match action {
        Action::Tap { .. } => "Tapping".into(),
        Action::DoubleTap { .. } => "Double tapping".into(),
        Action::LongPress { .. } => "Long pressing".into(),
        Action::Swipe { .. } => "Swiping".into(),
        Action::Type { text } => format!("Typing '{text}'"),
        Action::Launch { app_name } => format!("Launching {app_name}"),
        Action::Back => "Going back".into(),
        Action::Home => "Going home".into(),
        Action::Wait { .. } => "Waiting".into(),
        Action::Finish { .. } => COMPLETED.into(),
        Action::Error { reason } => failed(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptions_name_the_payload() {
        assert_eq!(
            describe(&Action::Type {
                text: "hello".into()
            }),
            "Typing 'hello'"
        );
        assert_eq!(
            describe(&Action::Launch {
                app_name: "Settings".into()
            }),
            "Launching Settings"
        );
        assert_eq!(describe(&Action::error("empty action")), "Error: empty action");
        assert_eq!(describe(&Action::Tap { x: 1, y: 2 }), "Tapping");
    }
}
