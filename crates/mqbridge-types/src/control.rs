//! Control-channel grammar.
//!
//! ```text
//! start|<pipeline>|<key>=<value>|<key>=<value>|...
//! stop
//! ```
//!
//! Tokens are split on `|` and trimmed.  The value of a `key=value` token is
//! everything after the first `=`, so values may contain `=` but never `|`;
//! no escaping is defined.  Tokens without `=` after the pipeline name are
//! ignored.

use std::fmt;

/// Recognised control verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlVerb {
    Start,
    Stop,
}

impl ControlVerb {
    /// Match a token exactly (case-sensitive).
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "start" => Some(ControlVerb::Start),
            "stop" => Some(ControlVerb::Stop),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ControlVerb::Start => "start",
            ControlVerb::Stop => "stop",
        }
    }
}

/// A parsed control-channel payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlCommand {
    pub verb: ControlVerb,
    /// Second positional token; `None` when missing or blank.
    pub pipeline: Option<String>,
    /// Remaining `key=value` tokens, in payload order.
    pub args: Vec<(String, String)>,
}

impl ControlCommand {
    pub const DELIMITER: char = '|';

    /// Parse `text`, returning `None` unless its first token is a control
    /// verb.
    pub fn parse(text: &str) -> Option<Self> {
        let mut tokens = text.split(Self::DELIMITER).map(str::trim);
        let verb = ControlVerb::parse(tokens.next()?)?;
        let pipeline = tokens
            .next()
            .filter(|token| !token.is_empty())
            .map(str::to_string);
        let args = tokens
            .filter_map(|token| token.split_once('='))
            .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
            .filter(|(key, _)| !key.is_empty())
            .collect();
        Some(Self {
            verb,
            pipeline,
            args,
        })
    }

    /// Parse a raw broker payload.  Non-UTF-8 payloads are never control
    /// commands.
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        std::str::from_utf8(payload).ok().and_then(Self::parse)
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb.as_str())?;
        if let Some(pipeline) = &self.pipeline {
            write!(f, "|{pipeline}")?;
        }
        for (key, value) in &self.args {
            write!(f, "|{key}={value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_start_with_args_preserves_order() {
        let cmd = ControlCommand::parse("start|detectnet|input=/dev/video0|width=640|height=480")
            .unwrap();
        assert_eq!(cmd.verb, ControlVerb::Start);
        assert_eq!(cmd.pipeline.as_deref(), Some("detectnet"));
        assert_eq!(
            cmd.args,
            vec![
                ("input".to_string(), "/dev/video0".to_string()),
                ("width".to_string(), "640".to_string()),
                ("height".to_string(), "480".to_string()),
            ]
        );
    }

    #[test]
    fn parse_stop_alone() {
        let cmd = ControlCommand::parse("stop").unwrap();
        assert_eq!(cmd.verb, ControlVerb::Stop);
        assert!(cmd.pipeline.is_none());
        assert!(cmd.args.is_empty());
    }

    #[test]
    fn parse_trims_whitespace_and_trailing_newline() {
        let cmd = ControlCommand::parse(" start | imagenet | width = 640 \n").unwrap();
        assert_eq!(cmd.pipeline.as_deref(), Some("imagenet"));
        assert_eq!(cmd.args, vec![("width".to_string(), "640".to_string())]);
    }

    #[test]
    fn value_keeps_everything_after_first_equals() {
        let cmd = ControlCommand::parse("start|videoviewer|output=rtp://host:1234?a=b").unwrap();
        assert_eq!(cmd.args[0].1, "rtp://host:1234?a=b");
    }

    #[test]
    fn tokens_without_equals_and_empty_keys_are_ignored() {
        let cmd = ControlCommand::parse("start|apriltag|verbose|=oops|rate=5").unwrap();
        assert_eq!(cmd.args, vec![("rate".to_string(), "5".to_string())]);
    }

    #[test]
    fn non_control_payloads_are_rejected() {
        assert!(ControlCommand::parse(r#"{"data": "start"}"#).is_none());
        assert!(ControlCommand::parse("Start|imagenet").is_none());
        assert!(ControlCommand::parse("").is_none());
        assert!(ControlCommand::from_payload(&[0xff, 0xfe, b'|']).is_none());
    }

    #[test]
    fn blank_pipeline_is_none() {
        let cmd = ControlCommand::parse("start||width=1").unwrap();
        assert!(cmd.pipeline.is_none());
        assert_eq!(cmd.args.len(), 1);
    }

    #[test]
    fn display_renders_wire_format() {
        let cmd = ControlCommand::parse("start|imagenet|width=640").unwrap();
        assert_eq!(cmd.to_string(), "start|imagenet|width=640");
        assert_eq!(ControlCommand::parse("stop").unwrap().to_string(), "stop");
    }
}
