//! SQLite storage for decoded blocks, contracts and the crawler cursor.
//!
//! Uses WAL mode so readers can query while the crawler writes. Each block
//! is written inside one transaction that first clears the block's previous
//! rows, which makes redelivery an overwrite.

use eyre::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use std::cell::RefCell;

use bee_abi::ContractMethodInfo;

use crate::sink::{BlockSink, CursorStore};
use crate::types::DecodedBlock;

pub struct Store {
    conn: RefCell<Connection>,
}

/// Row counts shown by the `status` command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreSummary {
    pub blocks: u64,
    pub max_block: Option<u64>,
    pub method_txs: u64,
    pub deployment_txs: u64,
    pub unattributed_txs: u64,
    pub events: u64,
    pub contracts: u64,
}

impl Store {
    /// Creates or opens a SQLite database with WAL mode enabled.
    ///
    /// # Errors
    /// Returns error if the database cannot be opened or migrations fail.
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path).wrap_err_with(|| format!("failed to open {path}"))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let store = Self {
            conn: RefCell::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn.borrow_mut().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS blocks (
                block_number INTEGER PRIMARY KEY,
                block_hash TEXT NOT NULL,
                parent_hash TEXT,
                timestamp INTEGER,
                miner TEXT,
                gas_used INTEGER,
                transaction_count INTEGER,
                chain_height INTEGER,
                ingested_at INTEGER
            );

            CREATE TABLE IF NOT EXISTS transactions (
                block_number INTEGER,
                tx_hash TEXT,
                tx_index INTEGER,
                from_address TEXT,
                to_address TEXT,
                contract_address TEXT,
                value TEXT,
                status INTEGER,
                gas_used INTEGER,
                input TEXT,
                attribution TEXT,
                contract_name TEXT,
                method_name TEXT,
                method_id TEXT,
                params TEXT,
                decode_error TEXT,
                PRIMARY KEY (block_number, tx_hash)
            );

            CREATE TABLE IF NOT EXISTS events (
                block_number INTEGER,
                log_index INTEGER,
                tx_hash TEXT,
                address TEXT,
                topics TEXT,
                data TEXT,
                contract_name TEXT,
                event_name TEXT,
                params TEXT,
                decode_error TEXT,
                PRIMARY KEY (block_number, log_index)
            );

            CREATE TABLE IF NOT EXISTS contracts (
                contract_name TEXT PRIMARY KEY,
                bytecode TEXT,
                abi_hash TEXT,
                methods TEXT,
                events TEXT
            );

            CREATE TABLE IF NOT EXISTS crawler_state (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                next_height INTEGER NOT NULL,
                updated_at INTEGER
            );
            ",
        )?;
        Ok(())
    }

    /// Stored hash of block `number`, if present.
    ///
    /// # Errors
    /// Returns error if the query fails.
    pub fn block_hash(&self, number: u64) -> Result<Option<String>> {
        let conn = self.conn.borrow();
        let hash = conn
            .query_row(
                "SELECT block_hash FROM blocks WHERE block_number = ?",
                rusqlite::params![number],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash)
    }

    /// Attribution of a stored transaction, if present.
    ///
    /// # Errors
    /// Returns error if the query fails.
    pub fn tx_attribution(&self, tx_hash: &str) -> Result<Option<String>> {
        let conn = self.conn.borrow();
        let attribution = conn
            .query_row(
                "SELECT attribution FROM transactions WHERE tx_hash = ?",
                rusqlite::params![tx_hash],
                |row| row.get(0),
            )
            .optional()?;
        Ok(attribution)
    }

    /// Counts stored rows per table and attribution.
    ///
    /// # Errors
    /// Returns error if a query fails.
    pub fn summary(&self) -> Result<StoreSummary> {
        let conn = self.conn.borrow();
        let count = |sql: &str| -> Result<u64> { Ok(conn.query_row(sql, [], |row| row.get(0))?) };

        let mut summary = StoreSummary {
            blocks: count("SELECT COUNT(*) FROM blocks")?,
            max_block: conn.query_row("SELECT MAX(block_number) FROM blocks", [], |row| row.get(0))?,
            events: count("SELECT COUNT(*) FROM events")?,
            contracts: count("SELECT COUNT(*) FROM contracts")?,
            ..StoreSummary::default()
        };

        let mut stmt =
            conn.prepare("SELECT attribution, COUNT(*) FROM transactions GROUP BY attribution")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?)))?;
        for row in rows {
            let (attribution, n) = row?;
            match attribution.as_str() {
                "method" => summary.method_txs = n,
                "deployment" => summary.deployment_txs = n,
                _ => summary.unattributed_txs += n,
            }
        }
        Ok(summary)
    }
}

impl BlockSink for Store {
    fn save_block(&self, block: &DecodedBlock) -> Result<()> {
        let mut conn = self.conn.borrow_mut();
        let tx = conn.transaction()?;
        {
            tx.execute(
                "DELETE FROM transactions WHERE block_number = ?",
                rusqlite::params![block.block_number],
            )?;
            tx.execute(
                "DELETE FROM events WHERE block_number = ?",
                rusqlite::params![block.block_number],
            )?;
            tx.execute(
                "
                INSERT OR REPLACE INTO blocks (
                    block_number, block_hash, parent_hash, timestamp, miner,
                    gas_used, transaction_count, chain_height, ingested_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ",
                rusqlite::params![
                    block.block_number,
                    block.block_hash,
                    block.parent_hash,
                    block.timestamp,
                    block.miner,
                    block.gas_used,
                    block.transaction_count,
                    block.chain_height,
                    block.ingested_at,
                ],
            )?;

            let mut stmt = tx.prepare(
                "
                INSERT OR REPLACE INTO transactions (
                    block_number, tx_hash, tx_index, from_address, to_address,
                    contract_address, value, status, gas_used, input, attribution,
                    contract_name, method_name, method_id, params, decode_error
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ",
            )?;
            for t in &block.transactions {
                stmt.execute(rusqlite::params![
                    t.block_number,
                    t.tx_hash,
                    t.tx_index,
                    t.from_address,
                    t.to_address,
                    t.contract_address,
                    t.value,
                    t.status,
                    t.gas_used,
                    t.input,
                    t.attribution.as_str(),
                    t.contract_name,
                    t.method_name,
                    t.method_id,
                    serde_json::to_string(&t.params)?,
                    t.decode_error,
                ])?;
            }

            let mut stmt = tx.prepare(
                "
                INSERT OR REPLACE INTO events (
                    block_number, log_index, tx_hash, address, topics, data,
                    contract_name, event_name, params, decode_error
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ",
            )?;
            for e in &block.events {
                stmt.execute(rusqlite::params![
                    e.block_number,
                    e.log_index,
                    e.tx_hash,
                    e.address,
                    serde_json::to_string(&e.topics)?,
                    e.data,
                    e.contract_name,
                    e.event_name,
                    serde_json::to_string(&e.params)?,
                    e.decode_error,
                ])?;
            }
        }
        tx.commit()
            .wrap_err_with(|| format!("failed to commit block {}", block.block_number))?;
        Ok(())
    }

    fn save_contract(&self, contract: &ContractMethodInfo) -> Result<()> {
        self.conn.borrow_mut().execute(
            "
            INSERT OR REPLACE INTO contracts (
                contract_name, bytecode, abi_hash, methods, events
            ) VALUES (?, ?, ?, ?, ?)
            ",
            rusqlite::params![
                contract.contract_name,
                contract.bytecode.to_string(),
                contract.abi_hash.to_string(),
                serde_json::to_string(&contract.methods)?,
                serde_json::to_string(&contract.events)?,
            ],
        )?;
        Ok(())
    }

    fn rollback_from(&self, height: u64) -> Result<usize> {
        let mut conn = self.conn.borrow_mut();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM transactions WHERE block_number >= ?",
            rusqlite::params![height],
        )?;
        tx.execute(
            "DELETE FROM events WHERE block_number >= ?",
            rusqlite::params![height],
        )?;
        let removed = tx.execute(
            "DELETE FROM blocks WHERE block_number >= ?",
            rusqlite::params![height],
        )?;
        tx.commit()?;
        tracing::info!(height, removed, "rolled back stored blocks");
        Ok(removed)
    }
}

impl CursorStore for Store {
    fn load_start_height(&self) -> Result<Option<u64>> {
        let conn = self.conn.borrow();
        let height = conn
            .query_row(
                "SELECT next_height FROM crawler_state WHERE id = 0",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(height)
    }

    fn advance_height(&self, next_height: u64) -> Result<()> {
        self.conn.borrow_mut().execute(
            "INSERT OR REPLACE INTO crawler_state (id, next_height, updated_at) VALUES (0, ?, ?)",
            rusqlite::params![next_height, chrono::Utc::now().timestamp()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Attribution, DecodedEvent, DecodedTransaction};

    fn sample_tx(block: u64, hash: &str, attribution: Attribution) -> DecodedTransaction {
        DecodedTransaction {
            block_number: block,
            tx_hash: hash.to_string(),
            tx_index: 0,
            from_address: "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266".to_string(),
            to_address: Some("0x70997970c51812e339d9b73b0245ad59e15ebbf9".to_string()),
            contract_address: None,
            value: "0".to_string(),
            status: 1,
            gas_used: 21_000,
            input: "0x".to_string(),
            attribution,
            contract_name: None,
            method_name: None,
            method_id: None,
            params: Vec::new(),
            decode_error: None,
        }
    }

    fn sample_block(number: u64, hash: &str, txs: Vec<DecodedTransaction>) -> DecodedBlock {
        DecodedBlock {
            block_number: number,
            block_hash: hash.to_string(),
            parent_hash: format!("0x{:064x}", number.saturating_sub(1)),
            timestamp: 1_708_617_600 + number * 12,
            miner: "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2".to_string(),
            gas_used: 21_000,
            transaction_count: txs.len() as u64,
            chain_height: number + 20,
            ingested_at: 1_708_617_600,
            transactions: txs,
            events: vec![DecodedEvent {
                block_number: number,
                tx_hash: "0xtx1".to_string(),
                log_index: 0,
                address: "0xtoken".to_string(),
                topics: vec!["0xtopic".to_string()],
                data: "0x".to_string(),
                contract_name: None,
                event_name: None,
                params: Vec::new(),
                decode_error: None,
            }],
        }
    }

    #[test]
    fn migrations_create_tables() {
        let store = Store::new(":memory:").expect("in-memory store should always open");
        let conn = store.conn.borrow();
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .expect("query should prepare");

        let tables: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .expect("query_map should succeed")
            .collect::<Result<Vec<_>, _>>()
            .expect("all rows should parse");

        assert!(tables.contains(&"blocks".to_string()));
        assert!(tables.contains(&"transactions".to_string()));
        assert!(tables.contains(&"events".to_string()));
        assert!(tables.contains(&"contracts".to_string()));
        assert!(tables.contains(&"crawler_state".to_string()));
    }

    #[test]
    fn save_block_overwrites_previous_delivery() {
        let store = Store::new(":memory:").expect("in-memory store should always open");

        let first = sample_block(100, "0xaaa", vec![sample_tx(100, "0xtx1", Attribution::Method)]);
        store.save_block(&first).expect("insert should succeed");

        // A re-org replaced the block and its transaction set
        let second = sample_block(
            100,
            "0xbbb",
            vec![sample_tx(100, "0xtx2", Attribution::Unattributed)],
        );
        store.save_block(&second).expect("overwrite should succeed");
        store.save_block(&second).expect("redelivery should succeed");

        assert_eq!(store.block_hash(100).unwrap().as_deref(), Some("0xbbb"));
        assert_eq!(store.tx_attribution("0xtx1").unwrap(), None);
        assert_eq!(
            store.tx_attribution("0xtx2").unwrap().as_deref(),
            Some("unattributed")
        );

        let summary = store.summary().unwrap();
        assert_eq!(summary.blocks, 1);
        assert_eq!(summary.unattributed_txs, 1);
        assert_eq!(summary.method_txs, 0);
        assert_eq!(summary.events, 1);
    }

    #[test]
    fn rollback_removes_blocks_at_and_above_height() {
        let store = Store::new(":memory:").expect("in-memory store should always open");
        for n in 10..15 {
            let tx = sample_tx(n, &format!("0xtx{n}"), Attribution::Method);
            store
                .save_block(&sample_block(n, &format!("0x{n}"), vec![tx]))
                .unwrap();
        }

        let removed = store.rollback_from(12).expect("rollback should succeed");
        assert_eq!(removed, 3);
        assert!(store.block_hash(11).unwrap().is_some());
        assert!(store.block_hash(12).unwrap().is_none());
        assert_eq!(store.tx_attribution("0xtx13").unwrap(), None);
        assert_eq!(store.summary().unwrap().max_block, Some(11));
    }

    #[test]
    fn cursor_round_trips_and_advances() {
        let store = Store::new(":memory:").expect("in-memory store should always open");
        assert_eq!(store.load_start_height().unwrap(), None);

        store.advance_height(50).unwrap();
        store.advance_height(53).unwrap();
        assert_eq!(store.load_start_height().unwrap(), Some(53));
    }

    #[test]
    fn cursor_survives_reopen() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("bee.sqlite");
        let path = path.to_str().expect("utf-8 path");

        Store::new(path).unwrap().advance_height(1_234).unwrap();
        assert_eq!(Store::new(path).unwrap().load_start_height().unwrap(), Some(1_234));
    }
}
