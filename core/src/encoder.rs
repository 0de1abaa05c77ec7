use alloy::{
    dyn_abi::{DynSolType, DynSolValue, JsonAbiExt, Specifier},
    json_abi::Function,
    primitives::Bytes,
};

use crate::error::EngineError;

/// Turns a function reference plus textual arguments into call data.
///
/// Intents may carry pre-encoded call data; this capability is only consulted when they carry
/// a function and arguments instead.
pub trait CallEncoder: Send + Sync {
    fn encode(&self, function: &str, args: &[String]) -> Result<Bytes, EngineError>;
}

/// Encodes calls described by a human readable signature such as `transfer(address,uint256)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureCallEncoder;

impl SignatureCallEncoder {
    fn parse_args(function: &Function, args: &[String]) -> Result<Vec<DynSolValue>, String> {
        if function.inputs.len() != args.len() {
            return Err(format!(
                "Parameter count mismatch: expected {}, got {}",
                function.inputs.len(),
                args.len()
            ));
        }

        function
            .inputs
            .iter()
            .zip(args)
            .map(|(param, arg)| {
                let sol_type: DynSolType = param
                    .resolve()
                    .map_err(|e| format!("Invalid Solidity type '{}': {e}", param.ty))?;
                sol_type
                    .coerce_str(arg.trim())
                    .map_err(|e| format!("Cannot parse '{arg}' as {}: {e}", param.ty))
            })
            .collect()
    }
}

impl CallEncoder for SignatureCallEncoder {
    fn encode(&self, function: &str, args: &[String]) -> Result<Bytes, EngineError> {
        let parsed = Function::parse(function.trim()).map_err(|e| {
            EngineError::validation(format!(
                "Cannot resolve function `{function}`, pass a full signature or encodedInputData: {e}"
            ))
        })?;

        let values = Self::parse_args(&parsed, args).map_err(EngineError::validation)?;

        parsed
            .abi_encode_input(&values)
            .map(Bytes::from)
            .map_err(|e| EngineError::validation(format!("Failed to encode function call: {e}")))
    }
}
