//! Target languages a task can be benchmarked in.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A target language (and with it, a test runtime).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// JavaScript on Node.js, tested with Jest.
    Nodejs,
    /// Java, tested with Maven Surefire.
    Java,
    /// C# on .NET, tested with `dotnet test`.
    Dotnet,
}

impl Language {
    /// Every supported language, in canonical order.
    pub const ALL: [Language; 3] = [Language::Nodejs, Language::Java, Language::Dotnet];

    pub fn as_str(self) -> &'static str {
        match self {
            Language::Nodejs => "nodejs",
            Language::Java => "java",
            Language::Dotnet => "dotnet",
        }
    }

    /// File name of the starter source inside a fixture directory.
    pub fn fixture_file(self) -> &'static str {
        match self {
            Language::Nodejs => "fixture.js",
            Language::Java => "Fixture.java",
            Language::Dotnet => "Fixture.cs",
        }
    }

    /// Web framework named in prompts for backend tasks.
    pub fn framework(self) -> &'static str {
        match self {
            Language::Nodejs => "Express.js",
            Language::Java => "Spring Boot",
            Language::Dotnet => "ASP.NET Core",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unrecognised language name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported language: {0} (expected nodejs, java, or dotnet)")]
pub struct UnknownLanguage(pub String);

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nodejs" | "node" | "js" => Ok(Language::Nodejs),
            "java" => Ok(Language::Java),
            "dotnet" | "csharp" | "cs" => Ok(Language::Dotnet),
            other => Err(UnknownLanguage(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!("nodejs".parse::<Language>().unwrap(), Language::Nodejs);
        assert_eq!(" Java ".parse::<Language>().unwrap(), Language::Java);
        assert_eq!("csharp".parse::<Language>().unwrap(), Language::Dotnet);
        assert!("cobol".parse::<Language>().is_err());
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&Language::Dotnet).unwrap();
        assert_eq!(json, "\"dotnet\"");
        let parsed: Language = serde_json::from_str("\"java\"").unwrap();
        assert_eq!(parsed, Language::Java);
    }
}
