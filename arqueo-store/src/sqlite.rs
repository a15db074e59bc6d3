use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use arqueo_core::{
    AccountId, Currency, DailyClosing, FundDocument, FundError, FundResult, Movement,
    MovementClass, MovementId, MovementKind,
};

use crate::{
    ClosingRepository, FundRepository, MovementPage, MovementQuery, MovementRepository,
    PageCursor, WriteAck,
};

const FUND_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS funds (
    company TEXT PRIMARY KEY,
    document TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS movements (
    company TEXT NOT NULL,
    id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    account TEXT NOT NULL,
    currency TEXT NOT NULL,
    provider_code TEXT NOT NULL,
    invoice_number TEXT NOT NULL,
    kind TEXT NOT NULL,
    class TEXT NOT NULL,
    amount_credit INTEGER NOT NULL,
    amount_debit INTEGER NOT NULL,
    manager TEXT NOT NULL,
    notes TEXT NOT NULL,
    is_audited INTEGER NOT NULL,
    original_entry_id TEXT,
    audit_history TEXT NOT NULL,
    breakdown TEXT,
    PRIMARY KEY (company, id)
);
CREATE INDEX IF NOT EXISTS movements_idx_created
    ON movements(company, created_at DESC, id DESC);
CREATE INDEX IF NOT EXISTS movements_idx_origin
    ON movements(company, original_entry_id);
CREATE TABLE IF NOT EXISTS closings (
    company TEXT NOT NULL,
    id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    document TEXT NOT NULL,
    PRIMARY KEY (company, id)
);
"#;

/// SQLite-backed store implementing all three Arqueo repositories: the fund
/// document, the partitioned movement collection and the closings collection.
#[derive(Clone, Debug)]
pub struct SqliteFundStore {
    path: PathBuf,
}

impl SqliteFundStore {
    pub fn new(path: impl Into<PathBuf>) -> FundResult<Self> {
        let store = Self { path: path.into() };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> FundResult<()> {
        let conn = self.connect()?;
        conn.execute_batch(FUND_SCHEMA)?;
        Ok(())
    }

    fn connect(&self) -> FundResult<Connection> {
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&self.path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        Ok(conn)
    }
}

impl MovementRepository for SqliteFundStore {
    fn upsert(&self, company: &str, movement: &Movement) -> FundResult<WriteAck> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT OR REPLACE INTO movements (
                company, id, created_at, account, currency, provider_code,
                invoice_number, kind, class, amount_credit, amount_debit,
                manager, notes, is_audited, original_entry_id, audit_history, breakdown
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                company,
                movement.id.as_str(),
                encode_time(movement.created_at),
                movement.account.as_str(),
                movement.currency.as_str(),
                movement.provider_code,
                movement.invoice_number,
                movement.kind.as_str(),
                movement.class.as_str(),
                movement.amount_credit,
                movement.amount_debit,
                movement.manager,
                movement.notes,
                movement.is_audited,
                movement.original_entry_id,
                serde_json::to_string(&movement.audit_history)?,
                movement
                    .breakdown
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
            ],
        )?;
        Ok(WriteAck::Confirmed)
    }

    fn delete(&self, company: &str, id: &MovementId) -> FundResult<WriteAck> {
        let conn = self.connect()?;
        conn.execute(
            "DELETE FROM movements WHERE company = ?1 AND id = ?2",
            params![company, id.as_str()],
        )?;
        Ok(WriteAck::Confirmed)
    }

    fn fetch(&self, company: &str, id: &MovementId) -> FundResult<Option<Movement>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, created_at, account, currency, provider_code, invoice_number,
                    kind, class, amount_credit, amount_debit, manager, notes,
                    is_audited, original_entry_id, audit_history, breakdown
             FROM movements WHERE company = ?1 AND id = ?2",
        )?;
        let mut rows = stmt.query(params![company, id.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_movement(row)?)),
            None => Ok(None),
        }
    }

    fn page(&self, company: &str, query: &MovementQuery) -> FundResult<MovementPage> {
        let conn = self.connect()?;
        let sql = "SELECT id, created_at, account, currency, provider_code, invoice_number,
                          kind, class, amount_credit, amount_debit, manager, notes,
                          is_audited, original_entry_id, audit_history, breakdown
                   FROM movements
                   WHERE company = ?1
                     AND (?2 IS NULL OR created_at >= ?2)
                     AND (?3 IS NULL OR created_at < ?3)
                     AND (?4 IS NULL OR original_entry_id = ?4)
                     AND (?5 IS NULL OR created_at < ?5 OR (created_at = ?5 AND id < ?6))
                   ORDER BY created_at DESC, id DESC
                   LIMIT ?7";
        let mut params: Vec<Value> = Vec::with_capacity(7);
        params.push(Value::from(company.to_string()));
        params.push(optional_text(query.start.map(encode_time)));
        params.push(optional_text(query.end.map(encode_time)));
        params.push(optional_text(query.original_entry_id.clone()));
        params.push(optional_text(
            query.cursor.as_ref().map(|c| encode_time(c.created_at)),
        ));
        params.push(optional_text(
            query.cursor.as_ref().map(|c| c.id.as_str().to_string()),
        ));
        params.push(Value::Integer(query.page_size as i64));

        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(row_to_movement(row)?);
        }
        let next = if items.len() == query.page_size {
            items.last().map(|last| PageCursor {
                created_at: last.created_at,
                id: last.id.clone(),
            })
        } else {
            None
        };
        Ok(MovementPage { items, next })
    }
}

impl FundRepository for SqliteFundStore {
    fn load(&self, company: &str) -> FundResult<Option<serde_json::Value>> {
        let conn = self.connect()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT document FROM funds WHERE company = ?1",
                params![company],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn store(&self, company: &str, document: &FundDocument) -> FundResult<WriteAck> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT OR REPLACE INTO funds (company, document, updated_at) VALUES (?1, ?2, ?3)",
            params![
                company,
                serde_json::to_string(document)?,
                encode_time(document.updated_at),
            ],
        )?;
        Ok(WriteAck::Confirmed)
    }
}

impl ClosingRepository for SqliteFundStore {
    fn upsert(&self, company: &str, closing: &DailyClosing) -> FundResult<WriteAck> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT OR REPLACE INTO closings (company, id, created_at, document)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                company,
                closing.id,
                encode_time(closing.created_at),
                serde_json::to_string(closing)?,
            ],
        )?;
        Ok(WriteAck::Confirmed)
    }

    fn fetch(&self, company: &str, id: &str) -> FundResult<Option<DailyClosing>> {
        let conn = self.connect()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT document FROM closings WHERE company = ?1 AND id = ?2",
                params![company, id],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn list(&self, company: &str) -> FundResult<Vec<DailyClosing>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT document FROM closings WHERE company = ?1 ORDER BY created_at DESC",
        )?;
        let mut rows = stmt.query(params![company])?;
        let mut closings = Vec::new();
        while let Some(row) = rows.next()? {
            let json: String = row.get(0)?;
            closings.push(serde_json::from_str(&json)?);
        }
        Ok(closings)
    }
}

/// Fixed-width RFC 3339 with millisecond precision so string comparison in
/// SQL matches chronological comparison.
fn encode_time(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn decode_time(raw: &str) -> FundResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| FundError::Serialization(format!("invalid timestamp {raw}: {err}")))
}

fn optional_text(value: Option<String>) -> Value {
    value.map(Value::from).unwrap_or(Value::Null)
}

fn row_to_movement(row: &rusqlite::Row<'_>) -> FundResult<Movement> {
    let id: String = row.get(0)?;
    let created_at: String = row.get(1)?;
    let account: String = row.get(2)?;
    let currency: String = row.get(3)?;
    let provider_code: String = row.get(4)?;
    let invoice_number: String = row.get(5)?;
    let kind: String = row.get(6)?;
    let class: String = row.get(7)?;
    let amount_credit: i64 = row.get(8)?;
    let amount_debit: i64 = row.get(9)?;
    let manager: String = row.get(10)?;
    let notes: String = row.get(11)?;
    let is_audited: bool = row.get(12)?;
    let original_entry_id: Option<String> = row.get(13)?;
    let audit_history: String = row.get(14)?;
    let breakdown: Option<String> = row.get(15)?;

    Ok(Movement {
        id: MovementId::from(id),
        created_at: decode_time(&created_at)?,
        account: AccountId::from_str(&account).map_err(FundError::Serialization)?,
        currency: Currency::from_str(&currency).map_err(FundError::Serialization)?,
        provider_code,
        invoice_number,
        kind: MovementKind::from_str(&kind).map_err(FundError::Serialization)?,
        class: MovementClass::from_str(&class).map_err(FundError::Serialization)?,
        amount_credit,
        amount_debit,
        manager,
        notes,
        is_audited,
        original_entry_id,
        audit_history: serde_json::from_str(&audit_history)?,
        breakdown: breakdown
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
    })
}
