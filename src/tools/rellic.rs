//! rellic: LLVM bitcode in, C out.

use std::path::Path;

use super::{ToolCommand, ToolProbe};

#[derive(Debug, Clone)]
pub struct Rellic {
    program: Vec<String>,
}

impl Rellic {
    pub fn new(program: Vec<String>) -> Self {
        Self { program }
    }
}

impl ToolCommand for Rellic {
    fn name(&self) -> &str {
        "rellic"
    }

    fn program(&self) -> &[String] {
        &self.program
    }

    fn input_extension(&self) -> Option<&str> {
        Some("bc")
    }

    fn output_extension(&self) -> &str {
        "c"
    }

    // rellic --lower_switch --remove_phi_nodes -logtostderr -input foo.bc -output work/0-foo.c
    fn build_command(&self, input: &Path, output: &Path) -> Vec<String> {
        let mut argv = self.program.clone();
        argv.extend([
            "--lower_switch".to_string(),
            "--remove_phi_nodes".to_string(),
            "-logtostderr".to_string(),
            "-input".to_string(),
            input.display().to_string(),
            "-output".to_string(),
            output.display().to_string(),
        ]);
        argv
    }

    fn probe(&self) -> ToolProbe {
        let mut argv = self.program.clone();
        argv.push("--version".to_string());
        ToolProbe {
            argv,
            require_success: false,
            reports_version: true,
        }
    }
}
