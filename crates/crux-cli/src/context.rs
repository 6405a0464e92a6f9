use std::collections::HashMap;

/// The outcome of running one command (spec §4.H "CLIResult").
#[derive(Debug, Clone, Default)]
pub struct CliResult {
    pub success: bool,
    pub output: String,
    pub error_message: String,
}

impl CliResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error_message: String::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error_message: message.into(),
        }
    }
}

/// A parsed command line: the positional arguments (args\[0\] is the
/// command name) and the `--k=v` / `--k v` / bare-flag options (spec
/// §4.H "CLIContext").
#[derive(Debug, Clone, Default)]
pub struct CliContext {
    pub args: Vec<String>,
    pub options: HashMap<String, String>,
}

impl CliContext {
    pub fn command_name(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    pub fn has_option(&self, name: &str) -> bool {
        self.options.contains_key(name)
    }

    pub fn get_option<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.options.get(name).map(String::as_str).unwrap_or(default)
    }
}

/// Splits a raw command line into positionals and options. The first
/// token is always a positional (the command name); every subsequent
/// token starting with `--` or `-` is parsed as an option, consuming a
/// following value token unless that token itself looks like another
/// option (spec §4.H "Parsing rules").
pub(crate) fn parse_command_line(line: &str) -> CliContext {
    let mut context = CliContext::default();
    let mut tokens = line.split_whitespace().peekable();
    let mut first = true;

    while let Some(token) = tokens.next() {
        if first {
            context.args.push(token.to_string());
            first = false;
            continue;
        }
        if let Some(rest) = token.strip_prefix("--") {
            if let Some((key, value)) = rest.split_once('=') {
                context.options.insert(key.to_string(), value.to_string());
            } else if tokens.peek().is_some_and(|next| !next.starts_with('-')) {
                context.options.insert(rest.to_string(), tokens.next().unwrap().to_string());
            } else {
                context.options.insert(rest.to_string(), "true".to_string());
            }
        } else if let Some(rest) = token.strip_prefix('-') {
            if rest.is_empty() {
                context.args.push(token.to_string());
            } else if tokens.peek().is_some_and(|next| !next.starts_with('-')) {
                context.options.insert(rest.to_string(), tokens.next().unwrap().to_string());
            } else {
                context.options.insert(rest.to_string(), "true".to_string());
            }
        } else {
            context.args.push(token.to_string());
        }
    }

    context
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_token_is_command_name_regardless_of_dashes() {
        let ctx = parse_command_line("status");
        assert_eq!(ctx.command_name(), Some("status"));
        assert!(ctx.options.is_empty());
    }

    #[test]
    fn long_option_with_equals() {
        let ctx = parse_command_line("config --section=logging");
        assert_eq!(ctx.get_option("section", ""), "logging");
    }

    #[test]
    fn long_option_with_separate_value() {
        let ctx = parse_command_line("threads --detail true");
        assert_eq!(ctx.get_option("detail", ""), "true");
    }

    #[test]
    fn bare_long_option_defaults_to_true() {
        let ctx = parse_command_line("threads --detail");
        assert_eq!(ctx.get_option("detail", ""), "true");
    }

    #[test]
    fn short_option_consumes_following_non_dash_value() {
        let ctx = parse_command_line("log-level -l info");
        assert_eq!(ctx.get_option("l", ""), "info");
    }

    #[test]
    fn option_followed_by_another_option_is_boolean() {
        let ctx = parse_command_line("threads --detail --quiet");
        assert_eq!(ctx.get_option("detail", ""), "true");
        assert_eq!(ctx.get_option("quiet", ""), "true");
    }

    #[test]
    fn positionals_after_options_are_still_collected() {
        let ctx = parse_command_line("log-level info");
        assert_eq!(ctx.args, vec!["log-level".to_string(), "info".to_string()]);
    }
}
