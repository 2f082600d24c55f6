use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use celine_core::audit::{AuditEvent, AuditRecord, integrity_token};
use celine_core::error::TriageError;
use celine_core::session::{Session, TranscriptEntry};
use celine_core::state::UrgencyTier;
use celine_core::ticket::{HandoffTicket, TicketStatus};

use crate::crypto::Envelope;

/// Encrypted persistence for sessions, transcript, the append-only audit
/// ledger, and the admin handoff queue. Every clinical payload is sealed
/// individually before it touches a row. The audit surface offers append and
/// ordered read only — no update or delete exists.
#[derive(Clone)]
pub struct TriageStore {
    pool: SqlitePool,
    envelope: Envelope,
}

/// A transcript row to be written as part of a commit.
#[derive(Debug, Clone)]
pub struct TranscriptWrite {
    pub entry: TranscriptEntry,
}

impl From<TranscriptEntry> for TranscriptWrite {
    fn from(entry: TranscriptEntry) -> Self {
        TranscriptWrite { entry }
    }
}

/// The ticket mutation a turn commit may carry. `Escalate` only touches a
/// ticket that is still open; a resolved row never changes again.
#[derive(Debug, Clone)]
pub enum TicketWrite {
    /// Insert a freshly opened ticket.
    Create(HandoffTicket),
    /// Raise the urgency of the already-open ticket in place.
    Escalate { id: Uuid, urgency: UrgencyTier },
}

fn db_err(context: &str, err: sqlx::Error) -> TriageError {
    TriageError::Storage(format!("{context}: {err}"))
}

impl TriageStore {
    /// Open (and create if missing) the store at `database_url`.
    /// `sqlite::memory:` gives a hermetic store for tests.
    pub async fn connect(database_url: &str, envelope: Envelope) -> Result<Self, TriageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| db_err("invalid database url", e))?
            .create_if_missing(true);

        // A single connection serializes writers at the pool layer; SQLite
        // is the embedded default, the backing store stays interchangeable
        // behind this type.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| db_err("database connect failed", e))?;

        let store = TriageStore { pool, envelope };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn in_memory(envelope: Envelope) -> Result<Self, TriageError> {
        Self::connect("sqlite::memory:", envelope).await
    }

    /// Direct pool handle for maintenance and inspection tooling.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<(), TriageError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                conversation_id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS transcript (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS audit_events (
                conversation_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                kind TEXT NOT NULL,
                previous_state TEXT NOT NULL,
                new_state TEXT NOT NULL,
                payload TEXT NOT NULL,
                integrity_token TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                PRIMARY KEY (conversation_id, seq)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS handoff_tickets (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                urgency TEXT NOT NULL,
                summary TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                resolved_at TEXT,
                resolution_note TEXT
            )
            "#,
        ];
        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| db_err("schema migration failed", e))?;
        }
        Ok(())
    }

    /// Load a session. Decryption failure is a hard error — a session that
    /// cannot be authenticated is never replaced with a default one.
    pub async fn load_session(&self, conversation_id: &str) -> Result<Option<Session>, TriageError> {
        let row = sqlx::query("SELECT payload FROM sessions WHERE conversation_id = ?")
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err("session read failed", e))?;

        match row {
            None => Ok(None),
            Some(row) => {
                let payload: String = row
                    .try_get("payload")
                    .map_err(|e| db_err("session row malformed", e))?;
                let session: Session = self.envelope.open_json(&payload)?;
                Ok(Some(session))
            }
        }
    }

    /// Commit one turn atomically: session upsert, audit appends with
    /// per-conversation sequence allocation, transcript appends, and at most
    /// one ticket write. Everything lands together or nothing does, so the
    /// trail never shows a transition without the matching session state.
    pub async fn commit_turn(
        &self,
        session: &Session,
        records: &[AuditRecord],
        messages: &[TranscriptWrite],
        ticket: Option<&TicketWrite>,
    ) -> Result<Vec<AuditEvent>, TriageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_err("transaction begin failed", e))?;

        upsert_session(&mut tx, &self.envelope, session).await?;
        let events =
            append_audit(&mut tx, &self.envelope, &session.conversation_id, records).await?;
        append_transcript(&mut tx, &self.envelope, &session.conversation_id, messages).await?;
        match ticket {
            Some(TicketWrite::Create(ticket)) => {
                insert_ticket(&mut tx, &self.envelope, ticket).await?;
            }
            Some(TicketWrite::Escalate { id, urgency }) => {
                escalate_ticket(&mut tx, *id, *urgency).await?;
            }
            None => {}
        }

        tx.commit()
            .await
            .map_err(|e| db_err("turn commit failed", e))?;
        Ok(events)
    }

    /// Commit a ticket resolution atomically: ticket row update, session
    /// upsert, audit append, transcript append.
    pub async fn commit_resolution(
        &self,
        ticket: &HandoffTicket,
        session: &Session,
        records: &[AuditRecord],
        messages: &[TranscriptWrite],
    ) -> Result<Vec<AuditEvent>, TriageError> {
        let resolution_note = match &ticket.resolution_note {
            Some(note) => Some(self.envelope.seal_text(note)?),
            None => None,
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_err("transaction begin failed", e))?;

        sqlx::query(
            "UPDATE handoff_tickets SET status = ?, resolved_at = ?, resolution_note = ? WHERE id = ?",
        )
        .bind(ticket.status.as_str())
        .bind(ticket.resolved_at)
        .bind(resolution_note)
        .bind(ticket.id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| db_err("ticket update failed", e))?;

        upsert_session(&mut tx, &self.envelope, session).await?;
        let events =
            append_audit(&mut tx, &self.envelope, &session.conversation_id, records).await?;
        append_transcript(&mut tx, &self.envelope, &session.conversation_id, messages).await?;

        tx.commit()
            .await
            .map_err(|e| db_err("resolution commit failed", e))?;
        Ok(events)
    }

    /// Ordered audit trail for a conversation. Every row is re-verified
    /// against its integrity token; a mismatch is tampering and surfaces as
    /// a storage error.
    pub async fn audit_trail(&self, conversation_id: &str) -> Result<Vec<AuditEvent>, TriageError> {
        let rows = sqlx::query(
            r#"
            SELECT conversation_id, seq, kind, previous_state, new_state,
                   payload, integrity_token, timestamp
            FROM audit_events
            WHERE conversation_id = ?
            ORDER BY seq ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("audit read failed", e))?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            events.push(self.decode_audit_row(&row)?);
        }
        Ok(events)
    }

    fn decode_audit_row(&self, row: &sqlx::sqlite::SqliteRow) -> Result<AuditEvent, TriageError> {
        let conversation_id: String = row
            .try_get("conversation_id")
            .map_err(|e| db_err("audit row malformed", e))?;
        let seq: i64 = row
            .try_get("seq")
            .map_err(|e| db_err("audit row malformed", e))?;
        let payload: String = row
            .try_get("payload")
            .map_err(|e| db_err("audit row malformed", e))?;
        let token: String = row
            .try_get("integrity_token")
            .map_err(|e| db_err("audit row malformed", e))?;

        let record: AuditRecord = self.envelope.open_json(&payload)?;
        let expected = integrity_token(
            &conversation_id,
            seq,
            record.kind,
            record.previous_state,
            record.new_state,
            &payload,
        );
        if expected != token {
            tracing::warn!(
                conversation = %conversation_id,
                seq,
                "audit event failed integrity verification"
            );
            return Err(TriageError::Storage(format!(
                "audit event {conversation_id}/{seq} failed integrity verification"
            )));
        }

        Ok(AuditEvent {
            conversation_id,
            seq,
            kind: record.kind,
            previous_state: record.previous_state,
            new_state: record.new_state,
            details: record.details,
            integrity_token: token,
            timestamp: record.timestamp,
        })
    }

    /// Ordered transcript for a conversation.
    pub async fn history(&self, conversation_id: &str) -> Result<Vec<TranscriptEntry>, TriageError> {
        let rows = sqlx::query(
            r#"
            SELECT role, content, timestamp
            FROM transcript
            WHERE conversation_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("transcript read failed", e))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let role: String = row
                .try_get("role")
                .map_err(|e| db_err("transcript row malformed", e))?;
            let content: String = row
                .try_get("content")
                .map_err(|e| db_err("transcript row malformed", e))?;
            let timestamp: DateTime<Utc> = row
                .try_get("timestamp")
                .map_err(|e| db_err("transcript row malformed", e))?;
            entries.push(TranscriptEntry {
                role: role.parse().map_err(TriageError::Storage)?,
                content: self.envelope.open_text(&content)?,
                timestamp,
            });
        }
        Ok(entries)
    }

    pub async fn ticket(&self, ticket_id: Uuid) -> Result<Option<HandoffTicket>, TriageError> {
        let row = sqlx::query(
            r#"
            SELECT id, conversation_id, urgency, summary, status,
                   created_at, resolved_at, resolution_note
            FROM handoff_tickets
            WHERE id = ?
            "#,
        )
        .bind(ticket_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("ticket read failed", e))?;

        match row {
            None => Ok(None),
            Some(row) => Ok(Some(self.decode_ticket_row(&row)?)),
        }
    }

    /// Open tickets, newest first. The admin queue UI consumes this.
    pub async fn list_open_tickets(&self) -> Result<Vec<HandoffTicket>, TriageError> {
        let rows = sqlx::query(
            r#"
            SELECT id, conversation_id, urgency, summary, status,
                   created_at, resolved_at, resolution_note
            FROM handoff_tickets
            WHERE status = 'open'
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("ticket list failed", e))?;

        let mut tickets = Vec::with_capacity(rows.len());
        for row in rows {
            tickets.push(self.decode_ticket_row(&row)?);
        }
        Ok(tickets)
    }

    fn decode_ticket_row(&self, row: &sqlx::sqlite::SqliteRow) -> Result<HandoffTicket, TriageError> {
        let id: String = row
            .try_get("id")
            .map_err(|e| db_err("ticket row malformed", e))?;
        let conversation_id: String = row
            .try_get("conversation_id")
            .map_err(|e| db_err("ticket row malformed", e))?;
        let urgency: String = row
            .try_get("urgency")
            .map_err(|e| db_err("ticket row malformed", e))?;
        let summary: String = row
            .try_get("summary")
            .map_err(|e| db_err("ticket row malformed", e))?;
        let status: String = row
            .try_get("status")
            .map_err(|e| db_err("ticket row malformed", e))?;
        let created_at: DateTime<Utc> = row
            .try_get("created_at")
            .map_err(|e| db_err("ticket row malformed", e))?;
        let resolved_at: Option<DateTime<Utc>> = row
            .try_get("resolved_at")
            .map_err(|e| db_err("ticket row malformed", e))?;
        let resolution_note: Option<String> = row
            .try_get("resolution_note")
            .map_err(|e| db_err("ticket row malformed", e))?;

        let resolution_note = match resolution_note {
            Some(sealed) => Some(self.envelope.open_text(&sealed)?),
            None => None,
        };

        Ok(HandoffTicket {
            id: Uuid::parse_str(&id)
                .map_err(|e| TriageError::Storage(format!("ticket id malformed: {e}")))?,
            conversation_id,
            urgency: UrgencyTier::from_str(&urgency).map_err(TriageError::Storage)?,
            summary: self.envelope.open_text(&summary)?,
            status: TicketStatus::from_str(&status).map_err(TriageError::Storage)?,
            created_at,
            resolved_at,
            resolution_note,
        })
    }
}

async fn upsert_session(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    envelope: &Envelope,
    session: &Session,
) -> Result<(), TriageError> {
    let payload = envelope.seal_json(session)?;
    sqlx::query(
        r#"
        INSERT INTO sessions (conversation_id, payload, created_at, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(conversation_id)
        DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at
        "#,
    )
    .bind(&session.conversation_id)
    .bind(payload)
    .bind(session.created_at)
    .bind(session.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| db_err("session write failed", e))?;
    Ok(())
}

async fn next_audit_seq(
    conn: &mut SqliteConnection,
    conversation_id: &str,
) -> Result<i64, TriageError> {
    let max: i64 =
        sqlx::query_scalar("SELECT COALESCE(MAX(seq), 0) FROM audit_events WHERE conversation_id = ?")
            .bind(conversation_id)
            .fetch_one(conn)
            .await
            .map_err(|e| db_err("audit sequence read failed", e))?;
    Ok(max + 1)
}

async fn append_audit(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    envelope: &Envelope,
    conversation_id: &str,
    records: &[AuditRecord],
) -> Result<Vec<AuditEvent>, TriageError> {
    let mut seq = next_audit_seq(&mut **tx, conversation_id).await?;
    let mut events = Vec::with_capacity(records.len());

    for record in records {
        let payload = envelope.seal_json(record)?;
        let token = integrity_token(
            conversation_id,
            seq,
            record.kind,
            record.previous_state,
            record.new_state,
            &payload,
        );

        sqlx::query(
            r#"
            INSERT INTO audit_events
                (conversation_id, seq, kind, previous_state, new_state,
                 payload, integrity_token, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(conversation_id)
        .bind(seq)
        .bind(record.kind.as_str())
        .bind(record.previous_state.as_str())
        .bind(record.new_state.as_str())
        .bind(&payload)
        .bind(&token)
        .bind(record.timestamp)
        .execute(&mut **tx)
        .await
        .map_err(|e| db_err("audit append failed", e))?;

        events.push(AuditEvent {
            conversation_id: conversation_id.to_string(),
            seq,
            kind: record.kind,
            previous_state: record.previous_state,
            new_state: record.new_state,
            details: record.details.clone(),
            integrity_token: token,
            timestamp: record.timestamp,
        });
        seq += 1;
    }
    Ok(events)
}

async fn append_transcript(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    envelope: &Envelope,
    conversation_id: &str,
    messages: &[TranscriptWrite],
) -> Result<(), TriageError> {
    for message in messages {
        let sealed = envelope.seal_text(&message.entry.content)?;
        sqlx::query(
            "INSERT INTO transcript (conversation_id, role, content, timestamp) VALUES (?, ?, ?, ?)",
        )
        .bind(conversation_id)
        .bind(message.entry.role.as_str())
        .bind(sealed)
        .bind(message.entry.timestamp)
        .execute(&mut **tx)
        .await
        .map_err(|e| db_err("transcript append failed", e))?;
    }
    Ok(())
}

async fn escalate_ticket(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    id: Uuid,
    urgency: UrgencyTier,
) -> Result<(), TriageError> {
    sqlx::query("UPDATE handoff_tickets SET urgency = ? WHERE id = ? AND status = 'open'")
        .bind(urgency.as_str())
        .bind(id.to_string())
        .execute(&mut **tx)
        .await
        .map_err(|e| db_err("ticket escalation failed", e))?;
    Ok(())
}

async fn insert_ticket(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    envelope: &Envelope,
    ticket: &HandoffTicket,
) -> Result<(), TriageError> {
    let summary = envelope.seal_text(&ticket.summary)?;
    sqlx::query(
        r#"
        INSERT INTO handoff_tickets
            (id, conversation_id, urgency, summary, status, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(ticket.id.to_string())
    .bind(&ticket.conversation_id)
    .bind(ticket.urgency.as_str())
    .bind(summary)
    .bind(ticket.status.as_str())
    .bind(ticket.created_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| db_err("ticket insert failed", e))?;
    Ok(())
}
