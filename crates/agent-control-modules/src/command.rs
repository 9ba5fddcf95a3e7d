//! Module argument line splitting.

use thiserror::Error;

/// Argument line error.
#[derive(Debug, Error)]
pub enum CommandLineError {
    #[error("Argument line cannot be parsed: {0}")]
    Invalid(String),
}

/// Split an argument line into words using the platform's shell rules.
///
/// # Errors
/// Returns error if the line has unbalanced quoting.
pub fn split_command_line(input: &str) -> Result<Vec<String>, CommandLineError> {
    #[cfg(windows)]
    {
        Ok(winsplit::split(input))
    }

    #[cfg(not(windows))]
    {
        shlex::split(input).ok_or_else(|| CommandLineError::Invalid(input.to_string()))
    }
}

#[cfg(all(test, not(windows)))]
mod tests {
    use super::*;

    #[test]
    fn test_split_honours_quotes() {
        let words = split_command_line(r#"-p "My Documents" --recursive"#).unwrap();
        assert_eq!(words, vec!["-p", "My Documents", "--recursive"]);
    }

    #[test]
    fn test_split_empty_line() {
        assert!(split_command_line("   ").unwrap().is_empty());
    }

    #[test]
    fn test_unbalanced_quote_is_error() {
        assert!(split_command_line("-p \"oops").is_err());
    }
}
