//! Command line parser - Splits raw input into a command name and arguments

/// Parsed command invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub name: String,
    pub args: Vec<String>,
}

/// Parses text input into command invocations
pub struct CommandParser {
    command_prefix: String,
}

impl CommandParser {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            command_prefix: prefix.into(),
        }
    }

    /// Parse a line; `None` for blank input.
    ///
    /// The prefix is optional. Double quotes group words into one argument.
    pub fn parse(&self, text: &str) -> Option<CommandLine> {
        let text = text.trim();
        let cmd_text = if !self.command_prefix.is_empty() && text.starts_with(&self.command_prefix) {
            &text[self.command_prefix.len()..]
        } else {
            text.trim_start_matches('/')
        };

        let mut parts = split_arguments(cmd_text).into_iter();
        let name = parts.next()?;
        Some(CommandLine {
            name,
            args: parts.collect(),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.command_prefix
    }
}

impl Default for CommandParser {
    fn default() -> Self {
        Self::new("/")
    }
}

fn split_arguments(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut pending = false;

    for c in text.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                pending = true;
            }
            c if c.is_whitespace() && !quoted => {
                if pending {
                    parts.push(std::mem::take(&mut current));
                    pending = false;
                }
            }
            c => {
                current.push(c);
                pending = true;
            }
        }
    }
    if pending {
        parts.push(current);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_with_args() {
        let parser = CommandParser::default();
        let line = parser.parse("/give sword 2").unwrap();
        assert_eq!(line.name, "give");
        assert_eq!(line.args, vec!["sword", "2"]);
    }

    #[test]
    fn test_prefix_is_optional() {
        let parser = CommandParser::new("!");
        assert_eq!(parser.parse("!help").unwrap().name, "help");
        assert_eq!(parser.parse("help").unwrap().name, "help");
        assert!(parser.parse("   ").is_none());
    }

    #[test]
    fn test_quoted_arguments() {
        let parser = CommandParser::default();
        let line = parser.parse(r#"/say "hello there" "" world"#).unwrap();
        assert_eq!(line.args, vec!["hello there", "", "world"]);
    }
}
