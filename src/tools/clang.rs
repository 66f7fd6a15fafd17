//! clang: recompile decompiled C to an object file.

use std::path::Path;

use super::{ToolCommand, ToolProbe};

#[derive(Debug, Clone)]
pub struct Clang {
    program: Vec<String>,
}

impl Clang {
    pub fn new(program: Vec<String>) -> Self {
        Self { program }
    }
}

impl ToolCommand for Clang {
    fn name(&self) -> &str {
        "clang"
    }

    fn program(&self) -> &[String] {
        &self.program
    }

    fn input_extension(&self) -> Option<&str> {
        Some("c")
    }

    fn output_extension(&self) -> &str {
        "o"
    }

    fn build_command(&self, input: &Path, output: &Path) -> Vec<String> {
        let mut argv = self.program.clone();
        argv.extend([
            "-c".to_string(),
            "-o".to_string(),
            output.display().to_string(),
            input.display().to_string(),
        ]);
        argv
    }

    fn probe(&self) -> ToolProbe {
        let mut argv = self.program.clone();
        argv.push("--version".to_string());
        ToolProbe {
            argv,
            require_success: true,
            reports_version: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_command() {
        let tool = Clang::new(vec!["clang-14".to_string()]);
        assert_eq!(
            tool.build_command(Path::new("src/a.c"), Path::new("w/2-a.o")),
            vec!["clang-14", "-c", "-o", "w/2-a.o", "src/a.c"]
        );
        assert_eq!(tool.output_extension(), "o");
    }
}
