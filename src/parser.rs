//! Decoding of raw model output.
//!
//! The model answers with `<think>…</think><answer>…</answer>`. The answer
//! holds one call such as `do(action="Tap", element=[500, 120])` or
//! `finish(message="done")`, with coordinates in a 1000×1000 virtual space.

use thiserror::Error;

use crate::action::{Action, ActionError};

pub const THINK_OPEN: &str = "<think>";
pub const THINK_CLOSE: &str = "</think>";
pub const ANSWER_OPEN: &str = "<answer>";
pub const ANSWER_CLOSE: &str = "</answer>";

/// Width of the coordinate space the model reasons in.
pub const VIRTUAL_WIDTH: f64 = 1000.0;
/// Height of the coordinate space the model reasons in.
pub const VIRTUAL_HEIGHT: f64 = 1000.0;

/// Longest Wait the model may ask for.
pub const MAX_WAIT_MS: u64 = 60_000;
/// Longest Swipe the model may ask for.
pub const MAX_SWIPE_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("empty action")]
    Empty,
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("unknown action: {0}")]
    UnknownAction(String),
    #[error("{action}: missing argument `{name}`")]
    MissingArgument { action: &'static str, name: &'static str },
    #[error("{action}: invalid argument `{name}`: {reason}")]
    InvalidArgument {
        action: &'static str,
        name: &'static str,
        reason: String,
    },
    #[error("{action}: coordinate {value} in `{name}` is outside the virtual screen")]
    OutOfRange {
        action: &'static str,
        name: &'static str,
        value: f64,
    },
    #[error(transparent)]
    Action(#[from] ActionError),
}

/// Split a raw response into `(rationale, action_spec)`.
///
/// Without an `<answer>` block the whole text is the rationale and the action
/// is empty. Segments are returned untrimmed so that a serialized assistant
/// turn splits back into exactly what was written.
pub fn parse_parts(raw: &str) -> (String, String) {
    let Some(answer_at) = raw.find(ANSWER_OPEN) else {
        return (raw.to_string(), String::new());
    };

    let head = &raw[..answer_at];
    let body = &raw[answer_at + ANSWER_OPEN.len()..];
    let action = match body.find(ANSWER_CLOSE) {
        Some(end) => &body[..end],
        None => body,
    };

    let rationale = match head.find(THINK_OPEN) {
        Some(start) => {
            let inner = &head[start + THINK_OPEN.len()..];
            match inner.find(THINK_CLOSE) {
                Some(end) => &inner[..end],
                None => inner,
            }
        }
        // `</think>` with no opener still closes the rationale.
        None => match head.find(THINK_CLOSE) {
            Some(end) => &head[..end],
            None => head,
        },
    };

    (rationale.to_string(), action.to_string())
}

/// Inverse of [`parse_parts`]: the markup an assistant turn is stored as.
pub fn format_parts(rationale: &str, action_spec: &str) -> String {
    format!("{THINK_OPEN}{rationale}{THINK_CLOSE}{ANSWER_OPEN}{action_spec}{ANSWER_CLOSE}")
}

/// Decode an action spec against the live screen size.
///
/// Never fails: anything undecodable becomes [`Action::Error`] so the loop can
/// report it back to the model.
pub fn parse(action_spec: &str, screen_width: u32, screen_height: u32) -> Action {
    match decode(action_spec.trim(), screen_width, screen_height) {
        Ok(action) => action,
        Err(err) => Action::error(err.to_string()),
    }
}

/// Like [`parse`], but surfaces the decoding error.
pub fn decode(spec: &str, screen_width: u32, screen_height: u32) -> Result<Action, ParseError> {
    if spec.is_empty() {
        return Err(ParseError::Empty);
    }

    let call = match Lexer::new(spec).call() {
        Ok(call) => call,
        Err(_) if is_finish(spec) => {
            // A finish with mangled arguments still ends the task.
            return Ok(Action::Finish {
                summary: lenient_message(spec),
            });
        }
        Err(err) => return Err(err),
    };

    let screen = Screen {
        width: f64::from(screen_width),
        height: f64::from(screen_height),
    };

    match call.name.as_str() {
        "finish" => Ok(Action::Finish {
            summary: match call.get("message") {
                Some(Value::Str(s)) => Some(s.clone()),
                _ => None,
            },
        }),
        "do" => decode_do(&call, screen),
        other => Err(ParseError::UnknownCommand(other.to_string())),
    }
}

#[derive(Debug, Clone, Copy)]
struct Screen {
    width: f64,
    height: f64,
}

fn decode_do(call: &Call, screen: Screen) -> Result<Action, ParseError> {
    let name = match call.get("action") {
        Some(Value::Str(name)) => name,
        Some(_) => {
            return Err(ParseError::InvalidArgument {
                action: "do",
                name: "action",
                reason: "expected a string".into(),
            });
        }
        None => {
            return Err(ParseError::MissingArgument {
                action: "do",
                name: "action",
            });
        }
    };

    let normalized: String = name
        .chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-'))
        .flat_map(char::to_lowercase)
        .collect();

    let action = match normalized.as_str() {
        "tap" => {
            let (x, y) = call.point("Tap", "element", screen)?;
            Action::tap(x, y)?
        }
        "doubletap" => {
            let (x, y) = call.point("Double Tap", "element", screen)?;
            Action::double_tap(x, y)?
        }
        "longpress" => {
            let (x, y) = call.point("Long Press", "element", screen)?;
            Action::long_press(x, y)?
        }
        "swipe" => {
            let start = call.point("Swipe", "start", screen)?;
            let end = call.point("Swipe", "end", screen)?;
            let duration = match call.get("duration_ms") {
                Some(_) => call.duration_ms("Swipe", "duration_ms", Unit::Millis, MAX_SWIPE_MS)?,
                None => call.duration_ms("Swipe", "duration", Unit::Seconds, MAX_SWIPE_MS)?,
            };
            Action::swipe(start, end, duration)?
        }
        "type" | "typename" => Action::Type {
            text: call.string("Type", "text")?,
        },
        "launch" => Action::Launch {
            app_name: call.string("Launch", "app")?,
        },
        "back" => Action::Back,
        "home" => Action::Home,
        "wait" => Action::wait(call.duration_ms(
            "Wait",
            "duration",
            Unit::Seconds,
            MAX_WAIT_MS,
        )?)?,
        _ => return Err(ParseError::UnknownAction(name.clone())),
    };
    Ok(action)
}

/// True when `spec` opens with a `finish(` call, whatever follows.
fn is_finish(spec: &str) -> bool {
    let mut lexer = Lexer::new(spec);
    lexer
        .ident()
        .is_ok_and(|name| name.eq_ignore_ascii_case("finish"))
        && lexer.expect('(').is_ok()
}

fn lenient_message(spec: &str) -> Option<String> {
    let (_, rest) = spec.split_once("message=")?;
    let rest = rest.trim_end().trim_end_matches(')').trim();
    let message = rest.trim_matches('"');
    (!message.is_empty()).then(|| message.to_string())
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Str(String),
    Num(f64),
    Point(f64, f64),
}

#[derive(Debug, Clone, Copy)]
enum Unit {
    Millis,
    Seconds,
}

#[derive(Debug)]
struct Call {
    name: String,
    args: Vec<(String, Value)>,
}

impl Call {
    fn get(&self, key: &str) -> Option<&Value> {
        self.args.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn string(&self, action: &'static str, name: &'static str) -> Result<String, ParseError> {
        match self.get(name) {
            Some(Value::Str(s)) => Ok(s.clone()),
            Some(Value::Num(n)) => Ok(n.to_string()),
            Some(Value::Point(..)) => Err(ParseError::InvalidArgument {
                action,
                name,
                reason: "expected a string".into(),
            }),
            None => Err(ParseError::MissingArgument { action, name }),
        }
    }

    /// Read `[x, y]` in virtual space and rescale it to pixels.
    fn point(
        &self,
        action: &'static str,
        name: &'static str,
        screen: Screen,
    ) -> Result<(f64, f64), ParseError> {
        let (vx, vy) = match self.get(name) {
            Some(Value::Point(x, y)) => (*x, *y),
            Some(_) => {
                return Err(ParseError::InvalidArgument {
                    action,
                    name,
                    reason: "expected [x, y]".into(),
                });
            }
            None => return Err(ParseError::MissingArgument { action, name }),
        };

        for (value, limit) in [(vx, VIRTUAL_WIDTH), (vy, VIRTUAL_HEIGHT)] {
            if !(0.0..=limit).contains(&value) {
                return Err(ParseError::OutOfRange {
                    action,
                    name,
                    value,
                });
            }
        }

        let x = (vx * screen.width / VIRTUAL_WIDTH).round();
        let y = (vy * screen.height / VIRTUAL_HEIGHT).round();
        Ok((x.min(screen.width), y.min(screen.height)))
    }

    fn duration_ms(
        &self,
        action: &'static str,
        name: &'static str,
        bare: Unit,
        max_ms: u64,
    ) -> Result<Option<f64>, ParseError> {
        let invalid = |reason: String| ParseError::InvalidArgument {
            action,
            name,
            reason,
        };
        let ms = match self.get(name) {
            None => return Ok(None),
            Some(Value::Num(n)) => scale(*n, bare),
            Some(Value::Point(..)) => return Err(invalid("expected a duration".into())),
            Some(Value::Str(text)) => {
                let text = text.trim();
                let split = text
                    .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                    .unwrap_or(text.len());
                let (number, unit) = text.split_at(split);
                let number: f64 = number
                    .parse()
                    .map_err(|_| invalid(format!("bad duration {text:?}")))?;
                let unit = match unit.trim().to_ascii_lowercase().as_str() {
                    "" => bare,
                    "ms" | "millisecond" | "milliseconds" => Unit::Millis,
                    "s" | "sec" | "secs" | "second" | "seconds" => Unit::Seconds,
                    other => return Err(invalid(format!("unknown unit {other:?}"))),
                };
                scale(number, unit)
            }
        };
        if ms > max_ms as f64 {
            return Err(invalid(format!("{ms}ms is longer than the {max_ms}ms limit")));
        }
        Ok(Some(ms))
    }
}

fn scale(value: f64, unit: Unit) -> f64 {
    match unit {
        Unit::Millis => value,
        Unit::Seconds => value * 1000.0,
    }
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::Syntax {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn expect(&mut self, want: char) -> Result<(), ParseError> {
        self.skip_ws();
        match self.bump() {
            Some(c) if c == want => Ok(()),
            Some(c) => Err(self.error(format!("expected '{want}', found '{c}'"))),
            None => Err(self.error(format!("expected '{want}', found end of input"))),
        }
    }

    fn ident(&mut self) -> Result<String, ParseError> {
        self.skip_ws();
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.bump();
        }
        if start == self.pos {
            return Err(self.error("expected an identifier"));
        }
        Ok(self.src[start..self.pos].to_string())
    }

    /// `ident(key=value, ...)`; anything after the closing paren is ignored.
    fn call(&mut self) -> Result<Call, ParseError> {
        let name = self.ident()?.to_ascii_lowercase();
        self.expect('(')?;

        let mut args = Vec::new();
        self.skip_ws();
        if self.peek() == Some(')') {
            self.bump();
            return Ok(Call { name, args });
        }

        loop {
            let key = self.ident()?;
            self.expect('=')?;
            let value = self.value()?;
            args.push((key, value));

            self.skip_ws();
            match self.bump() {
                Some(',') => {
                    self.skip_ws();
                    // tolerate a trailing comma
                    if self.peek() == Some(')') {
                        self.bump();
                        break;
                    }
                }
                Some(')') => break,
                Some(c) => return Err(self.error(format!("expected ',' or ')', found '{c}'"))),
                None => return Err(self.error("unterminated argument list")),
            }
        }

        Ok(Call { name, args })
    }

    fn value(&mut self) -> Result<Value, ParseError> {
        self.skip_ws();
        match self.peek() {
            Some('"') | Some('\'') => self.string().map(Value::Str),
            Some('[') => {
                self.bump();
                let x = self.number()?;
                self.expect(',')?;
                let y = self.number()?;
                self.expect(']')?;
                Ok(Value::Point(x, y))
            }
            Some(_) => self.number().map(Value::Num),
            None => Err(self.error("expected a value")),
        }
    }

    fn string(&mut self) -> Result<String, ParseError> {
        let quote = self.bump().ok_or_else(|| self.error("expected a string"))?;
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(c) => out.push(c),
                    None => return Err(self.error("unterminated escape")),
                },
                Some(c) if c == quote => return Ok(out),
                Some(c) => out.push(c),
                None => return Err(self.error("unterminated string")),
            }
        }
    }

    fn number(&mut self) -> Result<f64, ParseError> {
        self.skip_ws();
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
        {
            self.bump();
        }
        let text = &self.src[start..self.pos];
        if text.is_empty() {
            return Err(self.error("expected a number"));
        }
        text.parse::<f64>()
            .map_err(|_| self.error(format!("invalid number {text:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: u32 = 1080;
    const H: u32 = 2400;

    #[test]
    fn splits_think_and_answer() {
        let (thinking, action) = parse_parts(
            "<think>Open the settings app.</think><answer>do(action=\"Launch\", app=\"Settings\")</answer>",
        );
        assert_eq!(thinking, "Open the settings app.");
        assert_eq!(action, "do(action=\"Launch\", app=\"Settings\")");
    }

    #[test]
    fn missing_answer_keeps_everything_as_rationale() {
        let raw = "<think>I am not sure what to do</think> do(action=\"Back\")";
        assert_eq!(parse_parts(raw), (raw.to_string(), String::new()));
        assert_eq!(parse_parts(""), (String::new(), String::new()));
    }

    #[test]
    fn answer_without_think_uses_leading_text() {
        let (thinking, action) = parse_parts("go back\n<answer>do(action=\"Back\")");
        assert_eq!(thinking, "go back\n");
        assert_eq!(action, "do(action=\"Back\")");
    }

    #[test]
    fn formatted_parts_round_trip() {
        let rationale = "  line one\nline two  ";
        let spec = " do(action=\"Type\", text=\"héllo\") ";
        let (r, a) = parse_parts(&format_parts(rationale, spec));
        assert_eq!(r, rationale);
        assert_eq!(a, spec);

        // Reply that dropped the opening <think>.
        let (r, a) = parse_parts("I should go back.</think><answer>do(action=\"Back\")</answer>");
        assert_eq!(r, "I should go back.");
        let stored = format_parts(&r, &a);
        assert_eq!(stored.matches(THINK_CLOSE).count(), 1);
        assert_eq!(parse_parts(&stored), (r, a));
    }

    #[test]
    fn tap_is_rescaled_to_pixels() {
        assert_eq!(
            parse("do(action=\"Tap\", element=[500, 500])", W, H),
            Action::Tap { x: 540, y: 1200 }
        );
        assert_eq!(
            parse("do(action=\"Tap\", element=[1000, 0])", W, H),
            Action::Tap { x: 1080, y: 0 }
        );
    }

    #[test]
    fn scaling_stays_inside_the_screen() {
        let mut last_x = 0;
        for v in (0..=1000).step_by(7).chain([1000]) {
            let spec = format!("do(action=\"Long Press\", element=[{v}, {v}])");
            match parse(&spec, W, H) {
                Action::LongPress { x, y } => {
                    assert!(x <= W && y <= H, "{v} -> ({x}, {y})");
                    assert!(x >= last_x, "scaling must be monotonic");
                    last_x = x;
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn action_names_are_normalized() {
        assert_eq!(
            parse("do(action=\"Double Tap\", element=[0,0])", W, H),
            Action::DoubleTap { x: 0, y: 0 }
        );
        assert_eq!(
            parse("do(action=\"long_press\", element=[100,100])", W, H),
            Action::LongPress { x: 108, y: 240 }
        );
        assert_eq!(
            parse("do(action=\"Type_Name\", text=\"Bob\")", W, H),
            Action::Type { text: "Bob".into() }
        );
    }

    #[test]
    fn swipe_with_optional_duration() {
        assert_eq!(
            parse(
                "do(action=\"Swipe\", start=[500, 800], end=[500, 200])",
                W,
                H
            ),
            Action::Swipe {
                x1: 540,
                y1: 1920,
                x2: 540,
                y2: 480,
                duration_ms: None
            }
        );
        assert_eq!(
            parse(
                "do(action=\"Swipe\", start=[0, 0], end=[10, 10], duration_ms=350)",
                W,
                H
            ),
            Action::Swipe {
                x1: 0,
                y1: 0,
                x2: 11,
                y2: 24,
                duration_ms: Some(350)
            }
        );
    }

    #[test]
    fn text_arguments_keep_escapes_and_unicode() {
        assert_eq!(
            parse(r#"do(action="Type", text="say \"hi\"\n你好")"#, W, H),
            Action::Type {
                text: "say \"hi\"\n你好".into()
            }
        );
        assert_eq!(
            parse("do(action=\"Launch\", app=\"微信\")", W, H),
            Action::Launch {
                app_name: "微信".into()
            }
        );
    }

    #[test]
    fn navigation_and_wait() {
        assert_eq!(parse("do(action=\"Back\")", W, H), Action::Back);
        assert_eq!(parse(" do(action=\"Home\") \n", W, H), Action::Home);
        assert_eq!(
            parse("do(action=\"Wait\", duration=\"2 seconds\")", W, H),
            Action::Wait {
                duration_ms: Some(2000)
            }
        );
        assert_eq!(
            parse("do(action=\"Wait\", duration=\"500ms\")", W, H),
            Action::Wait {
                duration_ms: Some(500)
            }
        );
        assert_eq!(
            parse("do(action=\"Wait\")", W, H),
            Action::Wait { duration_ms: None }
        );
    }

    #[test]
    fn finish_ignores_extra_arguments() {
        assert_eq!(
            parse("finish(message=\"All done\", confidence=0.9)", W, H),
            Action::Finish {
                summary: Some("All done".into())
            }
        );
        assert_eq!(parse("finish()", W, H), Action::Finish { summary: None });
        assert_eq!(
            parse("finish(message=\"unterminated)", W, H),
            Action::Finish {
                summary: Some("unterminated".into())
            }
        );
    }

    #[test]
    fn bad_specs_become_error_actions() {
        assert_eq!(parse("", W, H), Action::error("empty action"));
        assert_eq!(parse("   ", W, H), Action::error("empty action"));

        for spec in [
            "do(action=\"Fly\")",
            "jump()",
            "do(action=\"Tap\")",
            "do(action=\"Tap\", element=[1001, 5])",
            "do(action=\"Tap\", element=[-3, 5])",
            "do(action=\"Tap\", element=[1x, 5])",
            "do(action=\"Launch\")",
            "do(action=\"Wait\", duration=\"soon\")",
            "do(action=\"Tap\", element=[5, 5]",
            "tap at the button",
            "finishing this requires tapping first",
            "finish the task by tapping OK",
        ] {
            assert!(
                matches!(parse(spec, W, H), Action::Error { .. }),
                "{spec} should not decode"
            );
        }
    }

    #[test]
    fn durations_are_capped() {
        assert!(matches!(
            decode("do(action=\"Wait\", duration=99999999)", W, H),
            Err(ParseError::InvalidArgument { action: "Wait", .. })
        ));
        assert!(matches!(
            decode("do(action=\"Wait\", duration=\"61 seconds\")", W, H),
            Err(ParseError::InvalidArgument { .. })
        ));
        assert_eq!(
            parse("do(action=\"Wait\", duration=60)", W, H),
            Action::Wait {
                duration_ms: Some(MAX_WAIT_MS)
            }
        );
        assert!(matches!(
            decode(
                "do(action=\"Swipe\", start=[0, 0], end=[9, 9], duration_ms=10001)",
                W,
                H
            ),
            Err(ParseError::InvalidArgument { action: "Swipe", .. })
        ));
        assert!(matches!(
            parse(
                "do(action=\"Swipe\", start=[0, 0], end=[9, 9], duration=11)",
                W,
                H
            ),
            Action::Error { .. }
        ));
    }

    #[test]
    fn decode_reports_specific_errors() {
        assert_eq!(
            decode("do(action=\"Tap\")", W, H),
            Err(ParseError::MissingArgument {
                action: "Tap",
                name: "element"
            })
        );
        assert_eq!(
            decode("do(action=\"Fly\")", W, H),
            Err(ParseError::UnknownAction("Fly".into()))
        );
        assert!(matches!(
            decode("do(action=\"Tap\", element=[5, 2000])", W, H),
            Err(ParseError::OutOfRange { value, .. }) if value == 2000.0
        ));
    }
}
