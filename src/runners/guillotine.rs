use super::{Backend, BackendId};

/// Guillotine's `guillotine-bench` tool.
///
/// Only ever picked up from the project tree, and run with its own and Zig's logging turned down to errors so the
/// timings are not dominated by log output.
#[derive(Clone, Copy, Debug, Default)]
pub struct GuillotineBench;

impl Backend for GuillotineBench {
    fn id(&self) -> BackendId {
        BackendId::Guillotine
    }

    fn candidates(&self) -> &'static [&'static str] {
        &[
            "apps/cli/guillotine-bench",
            "evms/guillotine-go-sdk/apps/cli/guillotine-bench",
        ]
    }

    fn path_fallback(&self) -> Option<&'static str> {
        None
    }

    fn hint(&self) -> &'static str {
        "build apps/cli in evms/guillotine-go-sdk"
    }

    fn arguments(&self, codefile: &str, gas: u64, input: Option<&str>) -> Vec<String> {
        let mut arguments = vec![
            "run".to_string(),
            "--codefile".to_string(),
            codefile.to_string(),
            "--gas".to_string(),
            gas.to_string(),
        ];
        if let Some(input) = input {
            arguments.extend(["--input".to_string(), input.to_string()]);
        }
        arguments
    }

    fn environment(&self) -> &'static [(&'static str, &'static str)] {
        &[("GUILLOTINE_LOG_LEVEL", "error"), ("ZIG_LOG_LEVEL", "error")]
    }
}
