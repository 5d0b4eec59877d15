//! The origin's payment ledger: a single JSON file mapping
//! `idempotencyKey -> PaymentLogRecord`, rewritten atomically on every
//! insert. Reads-then-insert are serialized by an internal mutex so the
//! "hit vs miss" check is atomic across concurrent requests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ace_x402_core::types::PaymentLogRecord;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::LedgerStoreError;

/// Outcome of consulting the ledger for a given idempotency key.
pub enum LedgerLookup {
    /// No record for this key; the caller should perform the work and
    /// insert a new record.
    Miss,
    /// An existing record whose `{payer, amount, requestHash}` match the
    /// incoming request.
    ReplayMatch(PaymentLogRecord),
    /// An existing record whose fields differ from the incoming request.
    Conflict(PaymentLogRecord),
}

/// A file-backed payment ledger, one JSON file holding the whole map.
pub struct PaymentLedger {
    path: PathBuf,
    guard: Mutex<()>,
}

impl PaymentLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    async fn read_all(&self) -> Result<HashMap<String, PaymentLogRecord>, LedgerStoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| LedgerStoreError::Corrupt(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(LedgerStoreError::Io(e.to_string())),
        }
    }

    async fn write_all(
        &self,
        records: &HashMap<String, PaymentLogRecord>,
    ) -> Result<(), LedgerStoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| LedgerStoreError::Io(e.to_string()))?;
            }
        }
        let tmp_path = tmp_path_for(&self.path);
        let mut json = serde_json::to_string_pretty(records)
            .map_err(|e| LedgerStoreError::Io(e.to_string()))?;
        json.push('\n');

        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|e| LedgerStoreError::Io(e.to_string()))?;
        file.write_all(json.as_bytes())
            .await
            .map_err(|e| LedgerStoreError::Io(e.to_string()))?;
        file.sync_all()
            .await
            .map_err(|e| LedgerStoreError::Io(e.to_string()))?;
        drop(file);

        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| LedgerStoreError::Io(e.to_string()))?;
        Ok(())
    }

    /// Look up `idempotency_key`, comparing `{payer, amount, request_hash}`
    /// against any stored record.
    pub async fn lookup(
        &self,
        idempotency_key: &str,
        payer: &str,
        amount_micro_usdc: u64,
        request_hash: &str,
    ) -> Result<LedgerLookup, LedgerStoreError> {
        let _permit = self.guard.lock().await;
        let records = self.read_all().await?;
        Ok(match records.get(idempotency_key) {
            None => LedgerLookup::Miss,
            Some(record) => {
                let payer_matches = record.payer.to_string().to_lowercase() == payer.to_lowercase();
                if payer_matches
                    && record.amount_micro_usdc == amount_micro_usdc
                    && record.request_hash == request_hash
                {
                    LedgerLookup::ReplayMatch(record.clone())
                } else {
                    LedgerLookup::Conflict(record.clone())
                }
            }
        })
    }

    /// Atomically re-check for a hit and, if still absent, insert `record`.
    /// Returns the record that ends up authoritative for this key (either
    /// the freshly inserted one, or a concurrently-inserted one this call
    /// lost the race to).
    pub async fn insert_if_absent(
        &self,
        record: PaymentLogRecord,
    ) -> Result<PaymentLogRecord, LedgerStoreError> {
        let _permit = self.guard.lock().await;
        let mut records = self.read_all().await?;
        let result = records
            .entry(record.idempotency_key.clone())
            .or_insert(record)
            .clone();
        self.write_all(&records).await?;
        Ok(result)
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;
    use chrono::Utc;
    use serde_json::json;

    fn record(key: &str, payer: &str, amount: u64, request_hash: &str) -> PaymentLogRecord {
        PaymentLogRecord {
            idempotency_key: key.to_string(),
            payer: payer.parse::<Address>().unwrap(),
            amount_micro_usdc: amount,
            request_hash: request_hash.to_string(),
            challenge_id: "chal_1".to_string(),
            paid_at: Utc::now(),
            result: json!({"computeId": "c1"}),
        }
    }

    #[tokio::test]
    async fn s6_first_insert_is_a_miss_second_is_replay() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = PaymentLedger::new(dir.path().join("ledger.json"));
        let payer = "0x0000000000000000000000000000000000dEaD";

        let lookup = ledger.lookup("aceid_1", payer, 1000, "rh").await.unwrap();
        assert!(matches!(lookup, LedgerLookup::Miss));

        let inserted = ledger
            .insert_if_absent(record("aceid_1", payer, 1000, "rh"))
            .await
            .unwrap();
        assert_eq!(inserted.idempotency_key, "aceid_1");

        let lookup = ledger.lookup("aceid_1", payer, 1000, "rh").await.unwrap();
        assert!(matches!(lookup, LedgerLookup::ReplayMatch(_)));
    }

    #[tokio::test]
    async fn s7_mismatched_amount_is_a_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = PaymentLedger::new(dir.path().join("ledger.json"));
        let payer = "0x0000000000000000000000000000000000dEaD";
        ledger
            .insert_if_absent(record("aceid_1", payer, 1000, "rh"))
            .await
            .unwrap();

        let lookup = ledger.lookup("aceid_1", payer, 9999, "rh").await.unwrap();
        assert!(matches!(lookup, LedgerLookup::Conflict(_)));
    }

    #[tokio::test]
    async fn ledger_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let payer = "0x0000000000000000000000000000000000dEaD";
        {
            let ledger = PaymentLedger::new(&path);
            ledger
                .insert_if_absent(record("aceid_1", payer, 1000, "rh"))
                .await
                .unwrap();
        }
        let ledger2 = PaymentLedger::new(&path);
        let lookup = ledger2.lookup("aceid_1", payer, 1000, "rh").await.unwrap();
        assert!(matches!(lookup, LedgerLookup::ReplayMatch(_)));
        assert!(!path.with_extension("json.tmp").exists());
    }
}
