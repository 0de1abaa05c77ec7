use alloy::{
    eips::eip2718::Encodable2718,
    network::{Ethereum, EthereumWallet, TransactionBuilder},
    primitives::{Address, B256, Bytes},
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
};

use crate::error::EngineError;

/// A fully signed transaction, ready for `eth_sendRawTransaction`.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub hash: B256,
    pub raw: Bytes,
}

/// Signs transactions for the wallets the engine holds local keys for.
#[derive(Clone, Default)]
pub struct EoaSigner {
    wallet: Option<EthereumWallet>,
    addresses: Vec<Address>,
}

impl EoaSigner {
    pub fn from_private_keys<I, S>(keys: I) -> Result<Self, EngineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut signer = Self::default();
        for key in keys {
            let local: PrivateKeySigner =
                key.as_ref()
                    .trim()
                    .parse()
                    .map_err(|e| EngineError::SigningError {
                        message: format!("Invalid private key: {e}"),
                    })?;
            signer.register(local);
        }
        Ok(signer)
    }

    pub fn register(&mut self, local: PrivateKeySigner) {
        let address = local.address();
        if self.addresses.contains(&address) {
            return;
        }

        match self.wallet.as_mut() {
            Some(wallet) => wallet.register_signer(local),
            None => self.wallet = Some(EthereumWallet::new(local)),
        }
        self.addresses.push(address);
    }

    pub fn has_signer(&self, address: &Address) -> bool {
        self.addresses.contains(address)
    }

    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    /// Signs a complete request. The request must carry `from`, nonce, gas limit and fees.
    pub async fn sign_transaction(
        &self,
        request: TransactionRequest,
    ) -> Result<SignedTransaction, EngineError> {
        let from = request.from.ok_or_else(|| EngineError::SigningError {
            message: "Transaction request has no sender".to_string(),
        })?;

        let wallet = match self.wallet.as_ref() {
            Some(wallet) if self.has_signer(&from) => wallet,
            _ => {
                return Err(EngineError::SigningError {
                    message: format!("No signer configured for {from}"),
                });
            }
        };

        let envelope = <TransactionRequest as TransactionBuilder<Ethereum>>::build(request, wallet)
            .await
            .map_err(|e| EngineError::SigningError {
                message: e.to_string(),
            })?;

        Ok(SignedTransaction {
            hash: *envelope.tx_hash(),
            raw: envelope.encoded_2718().into(),
        })
    }
}
