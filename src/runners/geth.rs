use super::{Backend, BackendId};

/// go-ethereum's standalone `evm` tool, built alongside `geth`.
#[derive(Clone, Copy, Debug, Default)]
pub struct GethEvm;

impl Backend for GethEvm {
    fn id(&self) -> BackendId {
        BackendId::Geth
    }

    fn candidates(&self) -> &'static [&'static str] {
        &["evms/go-ethereum/build/bin/evm"]
    }

    fn path_fallback(&self) -> Option<&'static str> {
        Some("evm")
    }

    fn hint(&self) -> &'static str {
        "run `make all` in evms/go-ethereum or install go-ethereum's evm tool"
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_run_arguments() {
        assert_eq!(
            GethEvm.arguments("/tmp/code.hex", 30_000_000, Some("30627b7c")),
            ["run", "--codefile", "/tmp/code.hex", "--gas", "30000000", "--input", "30627b7c"]
        );
        assert_eq!(
            GethEvm.arguments("/tmp/code.hex", 7, None),
            ["run", "--codefile", "/tmp/code.hex", "--gas", "7"]
        );
        assert!(GethEvm.environment().is_empty());
    }
}
