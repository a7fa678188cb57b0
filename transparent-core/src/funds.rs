use crate::error::{CoreError, Result};
use crate::storage::{from_millis, parse_column, to_millis, Storage};
use crate::types::{Lamports, WalletAddress};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Moves SOL between addresses. Game escrows are plain addresses (`pot_<game id>`).
#[async_trait]
pub trait FundsService: Send + Sync {
    /// Transfer `amount` and return the confirmed transaction signature.
    async fn transfer(
        &self,
        from: &WalletAddress,
        to: &WalletAddress,
        amount: Lamports,
    ) -> Result<String>;

    async fn balance(&self, address: &WalletAddress) -> Result<Lamports>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub signature: String,
    pub from: WalletAddress,
    pub to: WalletAddress,
    pub amount: Lamports,
    pub created_at: DateTime<Utc>,
}

/// Ledger kept in the local database, used by the CLI and tests.
pub struct LocalLedger {
    storage: Arc<Storage>,
}

impl LocalLedger {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Credit an address out of thin air.
    pub async fn airdrop(&self, address: &WalletAddress, amount: Lamports) -> Result<Lamports> {
        let conn = self.storage.get_connection().await;

        conn.execute(
            "INSERT INTO balances (address, lamports) VALUES (?1, ?2)
             ON CONFLICT(address) DO UPDATE SET lamports = lamports + ?2",
            params![address.as_str(), amount.as_u64() as i64],
        )?;

        let lamports: i64 = conn.query_row(
            "SELECT lamports FROM balances WHERE address = ?1",
            params![address.as_str()],
            |row| row.get(0),
        )?;

        tracing::info!("Airdropped {} to {}", amount, address);
        Ok(Lamports(lamports as u64))
    }

    /// Transfers touching an address, newest first.
    pub async fn history(&self, address: &WalletAddress) -> Result<Vec<TransferRecord>> {
        let conn = self.storage.get_connection().await;

        let mut stmt = conn.prepare(
            "SELECT signature, from_address, to_address, lamports, created_at FROM transfers
             WHERE from_address = ?1 OR to_address = ?1
             ORDER BY created_at DESC",
        )?;

        let transfers = stmt
            .query_map(params![address.as_str()], |row| {
                Ok(TransferRecord {
                    signature: row.get(0)?,
                    from: parse_column(row, 1, "from_address")?,
                    to: parse_column(row, 2, "to_address")?,
                    amount: Lamports(row.get::<_, i64>(3)? as u64),
                    created_at: from_millis(row.get(4)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(transfers)
    }
}

#[async_trait]
impl FundsService for LocalLedger {
    async fn transfer(
        &self,
        from: &WalletAddress,
        to: &WalletAddress,
        amount: Lamports,
    ) -> Result<String> {
        if amount.is_zero() {
            return Err(CoreError::InvalidAmount("transfer of zero lamports".to_string()));
        }

        let mut conn = self.storage.get_connection().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let available: i64 = tx
            .query_row(
                "SELECT lamports FROM balances WHERE address = ?1",
                params![from.as_str()],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0);

        if (available as u64) < amount.as_u64() {
            return Err(CoreError::InsufficientFunds {
                need: amount.as_u64(),
                available: available as u64,
            });
        }

        tx.execute(
            "UPDATE balances SET lamports = lamports - ?1 WHERE address = ?2",
            params![amount.as_u64() as i64, from.as_str()],
        )?;
        tx.execute(
            "INSERT INTO balances (address, lamports) VALUES (?1, ?2)
             ON CONFLICT(address) DO UPDATE SET lamports = lamports + ?2",
            params![to.as_str(), amount.as_u64() as i64],
        )?;

        let signature = transfer_signature(from, to, amount);
        tx.execute(
            "INSERT INTO transfers (signature, from_address, to_address, lamports, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                signature,
                from.as_str(),
                to.as_str(),
                amount.as_u64() as i64,
                to_millis(Utc::now()),
            ],
        )?;
        tx.commit()?;

        tracing::debug!("Transferred {} from {} to {}: {}", amount, from, to, signature);
        Ok(signature)
    }

    async fn balance(&self, address: &WalletAddress) -> Result<Lamports> {
        let conn = self.storage.get_connection().await;

        let lamports: Option<i64> = conn
            .query_row(
                "SELECT lamports FROM balances WHERE address = ?1",
                params![address.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        Ok(Lamports(lamports.unwrap_or(0) as u64))
    }
}

fn transfer_signature(from: &WalletAddress, to: &WalletAddress, amount: Lamports) -> String {
    let mut hasher = Sha256::new();
    hasher.update(from.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(to.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(amount.as_u64().to_le_bytes());
    hasher.update(uuid::Uuid::new_v4().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::{temp_storage, wallet};

    #[tokio::test]
    async fn test_transfer_moves_balance() {
        let (_dir, storage) = temp_storage().await;
        let ledger = LocalLedger::new(Arc::new(storage));

        ledger.airdrop(&wallet("alice"), Lamports(1_000)).await.unwrap();
        let signature = ledger
            .transfer(&wallet("alice"), &wallet("pot_g1"), Lamports(400))
            .await
            .unwrap();
        assert_eq!(signature.len(), 64);

        assert_eq!(ledger.balance(&wallet("alice")).await.unwrap(), Lamports(600));
        assert_eq!(ledger.balance(&wallet("pot_g1")).await.unwrap(), Lamports(400));
        assert_eq!(ledger.history(&wallet("alice")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_insufficient_funds() {
        let (_dir, storage) = temp_storage().await;
        let ledger = LocalLedger::new(Arc::new(storage));
        ledger.airdrop(&wallet("bob"), Lamports(10)).await.unwrap();

        let err = ledger
            .transfer(&wallet("bob"), &wallet("carol"), Lamports(11))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::InsufficientFunds { need: 11, available: 10 }
        ));
        assert!(err.is_funds());
        assert_eq!(ledger.balance(&wallet("bob")).await.unwrap(), Lamports(10));
    }
}
