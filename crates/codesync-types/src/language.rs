//! Document language tag and the canned code templates for each language.

use serde::{Deserialize, Serialize};

/// Code written into a freshly created room.
pub const WELCOME_TEMPLATE: &str = "\
// Welcome to your new CodeSync session!
// Share the Room ID to invite collaborators.

function hello() {
  console.log('Welcome to CodeSync!');
}
";

const JAVASCRIPT_TEMPLATE: &str = "\
// Welcome to your CodeSync session!
function greet(name) {
  console.log(`Hello, ${name}!`);
}

greet('World');
";

const PYTHON_TEMPLATE: &str = "\
# Welcome to your CodeSync session!
def greet(name):
  print(f\"Hello, {name}!\")

greet(\"World\")
";

const CPP_TEMPLATE: &str = "\
// Welcome to your CodeSync session!
#include <iostream>
#include <string>

void greet(std::string name) {
  std::cout << \"Hello, \" << name << \"!\" << std::endl;
}

int main() {
  greet(\"World\");
  return 0;
}
";

/// Language of the shared document.
///
/// Serialized lowercase (`"javascript"`, `"python"`, `"cpp"`). Unknown or
/// missing values decode to the default, [`Language::Javascript`].
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Language {
    #[default]
    Javascript,
    Python,
    Cpp,
}

impl Language {
    /// Canned example code shown after switching to this language.
    pub fn template(self) -> &'static str {
        match self {
            Self::Javascript => JAVASCRIPT_TEMPLATE,
            Self::Python => PYTHON_TEMPLATE,
            Self::Cpp => CPP_TEMPLATE,
        }
    }

    /// Human-facing name.
    pub fn label(self) -> &'static str {
        match self {
            Self::Javascript => "JavaScript",
            Self::Python => "Python",
            Self::Cpp => "C++",
        }
    }

    /// Lenient decode for remote payloads: anything unrecognised is the default.
    pub fn from_wire(value: Option<&str>) -> Self {
        value
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }
}

// ============================================================================
// Tests
// ============================================================================
