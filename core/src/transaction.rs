use std::fmt;

use alloy::{
    primitives::{Address, Bytes, U256},
    rpc::types::{AccessList, TransactionRequest},
};
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, PickFirst, serde_as};

use crate::{
    defs::{AddressDef, BytesDef, U256Def},
    error::EngineError,
};

/// Envelope type of the transaction to send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum TxType {
    /// Type 0, single gas price
    Legacy,
    /// Type 1, single gas price plus an access list
    AccessList,
    /// Type 2, base fee + priority fee
    #[default]
    Eip1559,
}

impl TxType {
    pub fn is_eip1559(&self) -> bool {
        matches!(self, TxType::Eip1559)
    }
}

impl From<TxType> for u8 {
    fn from(value: TxType) -> Self {
        match value {
            TxType::Legacy => 0,
            TxType::AccessList => 1,
            TxType::Eip1559 => 2,
        }
    }
}

impl TryFrom<u8> for TxType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TxType::Legacy),
            1 => Ok(TxType::AccessList),
            2 => Ok(TxType::Eip1559),
            other => Err(format!("unsupported transaction type {other}")),
        }
    }
}

impl fmt::Display for TxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

/// A fee bid. Which variant applies is decided by the transaction type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GasQuote {
    #[serde(rename_all = "camelCase")]
    Legacy { gas_price: u128 },
    #[serde(rename_all = "camelCase")]
    Eip1559 {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
}

impl GasQuote {
    pub fn gas_price(&self) -> Option<u128> {
        match self {
            GasQuote::Legacy { gas_price } => Some(*gas_price),
            GasQuote::Eip1559 { .. } => None,
        }
    }

    pub fn max_fee_per_gas(&self) -> Option<u128> {
        match self {
            GasQuote::Eip1559 {
                max_fee_per_gas, ..
            } => Some(*max_fee_per_gas),
            GasQuote::Legacy { .. } => None,
        }
    }

    pub fn max_priority_fee_per_gas(&self) -> Option<u128> {
        match self {
            GasQuote::Eip1559 {
                max_priority_fee_per_gas,
                ..
            } => Some(*max_priority_fee_per_gas),
            GasQuote::Legacy { .. } => None,
        }
    }

    /// True when every component of `self` outbids the matching component of `other`.
    pub fn outbids(&self, other: &GasQuote) -> bool {
        match (self, other) {
            (GasQuote::Legacy { gas_price: a }, GasQuote::Legacy { gas_price: b }) => a > b,
            (
                GasQuote::Eip1559 {
                    max_fee_per_gas: fee_a,
                    max_priority_fee_per_gas: tip_a,
                },
                GasQuote::Eip1559 {
                    max_fee_per_gas: fee_b,
                    max_priority_fee_per_gas: tip_b,
                },
            ) => fee_a > fee_b && tip_a > tip_b,
            _ => false,
        }
    }

    /// Writes the fee fields onto a request, clearing the ones of the other fee model.
    pub fn apply_to(&self, request: TransactionRequest, tx_type: TxType) -> TransactionRequest {
        let mut request = match self {
            GasQuote::Legacy { gas_price } => {
                let mut request = request.gas_price(*gas_price);
                request.max_fee_per_gas = None;
                request.max_priority_fee_per_gas = None;
                request
            }
            GasQuote::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let mut request = request
                    .max_fee_per_gas(*max_fee_per_gas)
                    .max_priority_fee_per_gas(*max_priority_fee_per_gas);
                request.gas_price = None;
                request
            }
        };

        request.transaction_type = Some(tx_type.into());
        if tx_type == TxType::AccessList && request.access_list.is_none() {
            request.access_list = Some(AccessList::default());
        }
        request
    }
}

/// Caller supplied gas settings. Anything left out is estimated or quoted by the engine.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GasOverrides {
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub gas_limit: Option<u64>,

    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub gas_price: Option<u128>,

    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub max_fee_per_gas: Option<u128>,

    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub max_priority_fee_per_gas: Option<u128>,
}

impl GasOverrides {
    /// The fee bid fixed by the caller, if they fixed one.
    pub fn quote(&self, tx_type: TxType) -> Option<GasQuote> {
        if tx_type.is_eip1559() {
            match (self.max_fee_per_gas, self.max_priority_fee_per_gas) {
                (Some(max_fee_per_gas), Some(max_priority_fee_per_gas)) => Some(GasQuote::Eip1559 {
                    max_fee_per_gas,
                    max_priority_fee_per_gas,
                }),
                _ => None,
            }
        } else {
            self.gas_price.map(|gas_price| GasQuote::Legacy { gas_price })
        }
    }

    fn validate(&self, tx_type: TxType) -> Result<(), EngineError> {
        let has_1559_fields =
            self.max_fee_per_gas.is_some() || self.max_priority_fee_per_gas.is_some();

        if tx_type.is_eip1559() {
            if self.gas_price.is_some() {
                return Err(EngineError::validation(
                    "gasPrice cannot be combined with txType 2, use maxFeePerGas and maxPriorityFeePerGas",
                ));
            }
            if has_1559_fields
                && (self.max_fee_per_gas.is_none() || self.max_priority_fee_per_gas.is_none())
            {
                return Err(EngineError::validation(
                    "maxFeePerGas and maxPriorityFeePerGas must be provided together",
                ));
            }
            if let (Some(max_fee), Some(tip)) =
                (self.max_fee_per_gas, self.max_priority_fee_per_gas)
            {
                if tip > max_fee {
                    return Err(EngineError::validation(
                        "maxPriorityFeePerGas cannot exceed maxFeePerGas",
                    ));
                }
            }
        } else if has_1559_fields {
            return Err(EngineError::validation(format!(
                "maxFeePerGas/maxPriorityFeePerGas are not valid for txType {tx_type}, use gasPrice"
            )));
        }

        if self.gas_limit == Some(0) {
            return Err(EngineError::validation("gasLimit must be greater than zero"));
        }

        Ok(())
    }
}

/// What a caller asks the engine to execute. Immutable once accepted.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransactionIntent {
    /// Chain to execute on, as a number or a decimal string
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    #[schema(value_type = String, example = "80001")]
    pub chain_id: u64,

    /// The backend wallet sending the transaction
    #[schema(value_type = AddressDef)]
    pub wallet_address: Address,

    #[serde(default)]
    #[schema(value_type = Option<AddressDef>)]
    pub contract_address: Option<Address>,

    /// A function signature such as `transfer(address,uint256)`, or a label when
    /// `encodedInputData` is supplied
    #[serde(default)]
    pub function_name: Option<String>,

    #[serde(default)]
    pub function_args: Vec<String>,

    #[serde(default)]
    #[schema(value_type = Option<BytesDef>)]
    pub encoded_input_data: Option<Bytes>,

    #[serde(default)]
    pub extension: Option<String>,

    #[serde(default)]
    #[schema(value_type = Option<U256Def>)]
    pub value: U256,

    /// 0 or 1 for gas price based transactions, 2 (default) for EIP-1559
    #[serde(default)]
    #[schema(value_type = Option<u8>)]
    pub tx_type: Option<TxType>,

    #[serde(flatten)]
    pub gas: GasOverrides,
}

impl TransactionIntent {
    pub fn tx_type(&self) -> TxType {
        self.tx_type.unwrap_or_default()
    }

    /// Structural checks that need no chain or store access.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.chain_id == 0 {
            return Err(EngineError::validation("chainId is required"));
        }

        if self.wallet_address == Address::ZERO {
            return Err(EngineError::validation("walletAddress is required"));
        }

        match self.contract_address {
            None => {
                return Err(EngineError::validation(
                    "contractAddress is required, contract deployment is not supported",
                ));
            }
            Some(address) if address == Address::ZERO => {
                return Err(EngineError::validation(
                    "contractAddress cannot be the zero address",
                ));
            }
            Some(_) => {}
        }

        let has_function = self
            .function_name
            .as_deref()
            .is_some_and(|name| !name.trim().is_empty());
        if self.encoded_input_data.is_none() && !has_function {
            return Err(EngineError::validation(
                "either encodedInputData or functionName must be provided",
            ));
        }

        self.gas.validate(self.tx_type())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    fn sample_intent() -> TransactionIntent {
        serde_json::from_value(serde_json::json!({
            "chainId": "80001",
            "walletAddress": "0x1946267d81Fb8aDeeEa28e6B98bcD446c8248473",
            "contractAddress": "0x365b83D67D5539C6583b9c0266A548926Bf216F4",
            "functionName": "transfer",
            "functionArgs": ["0x3EcDBF3B911d0e9052b64850693888b008e18373", "1000000"],
            "encodedInputData": "0xa9059cbb"
        }))
        .unwrap()
    }

    #[test]
    fn chain_id_accepts_strings_and_numbers() {
        assert_eq!(sample_intent().chain_id, 80001);

        let numeric: TransactionIntent = serde_json::from_value(serde_json::json!({
            "chainId": 137,
            "walletAddress": "0x1946267d81Fb8aDeeEa28e6B98bcD446c8248473",
            "contractAddress": "0x365b83D67D5539C6583b9c0266A548926Bf216F4",
            "encodedInputData": "0x"
        }))
        .unwrap();
        assert_eq!(numeric.chain_id, 137);
        assert_eq!(numeric.tx_type(), TxType::Eip1559);
    }

    #[test]
    fn requires_call_data_or_function() {
        let mut intent = sample_intent();
        intent.encoded_input_data = None;
        intent.function_name = None;
        assert!(matches!(
            intent.validate(),
            Err(EngineError::ValidationError { .. })
        ));
    }

    #[test]
    fn rejects_mixed_fee_models() {
        let mut intent = sample_intent();
        intent.gas.gas_price = Some(1);
        assert!(intent.validate().is_err());

        let mut intent = sample_intent();
        intent.tx_type = Some(TxType::Legacy);
        intent.gas.max_fee_per_gas = Some(10);
        assert!(intent.validate().is_err());

        let mut intent = sample_intent();
        intent.gas.max_fee_per_gas = Some(10);
        assert!(intent.validate().is_err());
    }

    #[test]
    fn overrides_produce_quotes_for_the_right_type() {
        let overrides = GasOverrides {
            gas_price: Some(7),
            max_fee_per_gas: Some(20),
            max_priority_fee_per_gas: Some(2),
            ..Default::default()
        };

        assert_eq!(
            overrides.quote(TxType::Legacy),
            Some(GasQuote::Legacy { gas_price: 7 })
        );
        assert_eq!(
            overrides.quote(TxType::Eip1559),
            Some(GasQuote::Eip1559 {
                max_fee_per_gas: 20,
                max_priority_fee_per_gas: 2
            })
        );
    }

    #[test]
    fn applying_a_quote_clears_the_other_fee_model() {
        let to = address!("365b83D67D5539C6583b9c0266A548926Bf216F4");
        let request = TransactionRequest::default().to(to).gas_price(5);
        let request = GasQuote::Eip1559 {
            max_fee_per_gas: 30,
            max_priority_fee_per_gas: 3,
        }
        .apply_to(request, TxType::Eip1559);

        assert_eq!(request.gas_price, None);
        assert_eq!(request.max_fee_per_gas, Some(30));
        assert_eq!(request.transaction_type, Some(2));
    }

    #[test]
    fn tx_type_round_trips_as_number() {
        assert_eq!(serde_json::to_value(TxType::Eip1559).unwrap(), 2);
        assert!(serde_json::from_value::<TxType>(serde_json::json!(4)).is_err());
    }
}
