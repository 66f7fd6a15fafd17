//! anvill: ELF binary in, JSON program description out.

use std::path::Path;

use super::{ToolCommand, ToolProbe};

#[derive(Debug, Clone)]
pub struct Anvill {
    program: Vec<String>,
}

impl Anvill {
    pub fn new(program: Vec<String>) -> Self {
        Self { program }
    }
}

impl ToolCommand for Anvill {
    fn name(&self) -> &str {
        "anvill"
    }

    fn program(&self) -> &[String] {
        &self.program
    }

    fn input_extension(&self) -> Option<&str> {
        Some("elf")
    }

    fn output_extension(&self) -> &str {
        "json"
    }

    fn build_command(&self, input: &Path, output: &Path) -> Vec<String> {
        let mut argv = self.program.clone();
        argv.extend([
            "--bin_in".to_string(),
            input.display().to_string(),
            "--spec_out".to_string(),
            output.display().to_string(),
            "--log_file".to_string(),
            "/dev/stderr".to_string(),
        ]);
        argv
    }

    // No version flag; a clean `-h` is the availability check.
    fn probe(&self) -> ToolProbe {
        let mut argv = self.program.clone();
        argv.push("-h".to_string());
        ToolProbe {
            argv,
            require_success: true,
            reports_version: false,
        }
    }
}
