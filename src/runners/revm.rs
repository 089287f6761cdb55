use super::{Backend, BackendId};

/// revm's `revme` command-line tool.
///
/// Release builds are preferred over debug builds, and a checkout at the project root over one under `evms/`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Revme;

impl Backend for Revme {
    fn id(&self) -> BackendId {
        BackendId::Revm
    }

    fn candidates(&self) -> &'static [&'static str] {
        &[
            "revm/target/release/revme",
            "evms/revm/target/release/revme",
            "revm/target/debug/revme",
            "evms/revm/target/debug/revme",
        ]
    }

    fn path_fallback(&self) -> Option<&'static str> {
        Some("revme")
    }

    fn hint(&self) -> &'static str {
        "run `cargo build --release -p revme` in evms/revm"
    }

    fn arguments(&self, codefile: &str, gas: u64, input: Option<&str>) -> Vec<String> {
        let mut arguments = vec![
            "evm".to_string(),
            "--path".to_string(),
            codefile.to_string(),
            "--gas-limit".to_string(),
            gas.to_string(),
        ];
        if let Some(input) = input {
            arguments.extend(["--input".to_string(), input.to_string()]);
        }
        arguments
    }
}
