use crate::calc::{memorization_progress, TrackingKind};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::handlers::quran::range_from_params;
use crate::ipc::handlers::students::ensure_student;
use crate::ipc::helpers::{
    date_or_today, load_config, now_rfc3339, opt_str, req_str, require_db, u32_from,
};
use crate::ipc::types::{AppState, Request};
use crate::quran::{ChapterCatalog, VerseRange};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::json;
use uuid::Uuid;

const ENTRY_COLUMNS: &str = "id, student_id, kind, from_chapter, to_chapter, from_verse, to_verse,
     total_verses, recorded_on, note, created_at";

struct EntryRow {
    id: String,
    student_id: String,
    kind: String,
    range: VerseRange,
    total_verses: i64,
    recorded_on: String,
    note: Option<String>,
    created_at: String,
}

impl EntryRow {
    fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            student_id: r.get(1)?,
            kind: r.get(2)?,
            range: VerseRange {
                from_chapter: r.get(3)?,
                to_chapter: r.get(4)?,
                from_verse: r.get(5)?,
                to_verse: r.get(6)?,
            },
            total_verses: r.get(7)?,
            recorded_on: r.get(8)?,
            note: r.get(9)?,
            created_at: r.get(10)?,
        })
    }

    fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "studentId": self.student_id,
            "kind": self.kind,
            "fromChapter": self.range.from_chapter,
            "toChapter": self.range.to_chapter,
            "fromVerse": self.range.from_verse,
            "toVerse": self.range.to_verse,
            "totalVerses": self.total_verses,
            "direction": self.range.direction(),
            "recordedOn": self.recorded_on,
            "note": self.note,
            "createdAt": self.created_at,
        })
    }
}

fn parse_kind(raw: Option<&str>) -> Result<Option<TrackingKind>, HandlerErr> {
    match raw {
        None => Ok(None),
        Some(s) => TrackingKind::parse(s).map(Some).ok_or_else(|| {
            HandlerErr::bad_params("kind must be one of: memorization, revision")
                .with_details(json!({ "kind": s }))
        }),
    }
}

fn load_entry(conn: &Connection, entry_id: &str) -> Result<EntryRow, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM tracking_entries WHERE id = ?", ENTRY_COLUMNS),
        [entry_id],
        EntryRow::from_row,
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))?
    .ok_or_else(|| HandlerErr::not_found("tracking entry not found"))
}

fn load_entries(
    conn: &Connection,
    student_id: &str,
    kind: Option<TrackingKind>,
) -> Result<Vec<EntryRow>, HandlerErr> {
    let sql = format!(
        "SELECT {} FROM tracking_entries
         WHERE student_id = ?1 AND (?2 IS NULL OR kind = ?2)
         ORDER BY recorded_on, created_at",
        ENTRY_COLUMNS
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    stmt.query_map((student_id, kind.map(|k| k.as_str())), EntryRow::from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn tracking_create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = req_str(req, "studentId")?;
    ensure_student(conn, student_id)?;
    let kind = parse_kind(opt_str(req, "kind"))?.unwrap_or(TrackingKind::Memorization);
    let range = range_from_params(&req.params)?;
    let recorded_on = date_or_today(req, "recordedOn")?;
    let note = opt_str(req, "note")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    // Any client-sent totalVerses is ignored; the server count is authoritative.
    let policy = load_config(conn)?.range_policy;
    let total = ChapterCatalog::standard().count_verses_with_policy(&range, policy)?;

    let entry_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO tracking_entries(
            id, student_id, kind, from_chapter, to_chapter, from_verse, to_verse,
            total_verses, recorded_on, note, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            entry_id,
            student_id,
            kind.as_str(),
            range.from_chapter,
            range.to_chapter,
            range.from_verse,
            range.to_verse,
            total as i64,
            recorded_on,
            note,
            now_rfc3339(),
        ],
    )
    .map_err(|e| {
        HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "tracking_entries" }))
    })?;
    tracing::info!(entry = %entry_id, student = student_id, total, "tracking entry recorded");

    Ok(json!({ "entry": load_entry(conn, &entry_id)?.to_json() }))
}

fn tracking_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = req_str(req, "studentId")?;
    ensure_student(conn, student_id)?;
    let kind = parse_kind(opt_str(req, "kind"))?;
    let entries: Vec<serde_json::Value> = load_entries(conn, student_id, kind)?
        .iter()
        .map(EntryRow::to_json)
        .collect();
    Ok(json!({ "entries": entries }))
}

fn tracking_update(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let entry_id = req_str(req, "entryId")?;
    let mut entry = load_entry(conn, entry_id)?;

    if let Some(kind) = parse_kind(opt_str(req, "kind"))? {
        entry.kind = kind.as_str().to_string();
    }
    for (key, slot) in [
        ("fromChapter", &mut entry.range.from_chapter),
        ("toChapter", &mut entry.range.to_chapter),
        ("fromVerse", &mut entry.range.from_verse),
        ("toVerse", &mut entry.range.to_verse),
    ] {
        if let Some(v) = req.params.get(key).filter(|v| !v.is_null()) {
            *slot = u32_from(v, key)?;
        }
    }
    if req.params.get("recordedOn").is_some() {
        entry.recorded_on = date_or_today(req, "recordedOn")?;
    }
    if let Some(v) = req.params.get("note") {
        entry.note = v
            .as_str()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
    }

    let policy = load_config(conn)?.range_policy;
    let total = ChapterCatalog::standard().count_verses_with_policy(&entry.range, policy)?;

    conn.execute(
        "UPDATE tracking_entries
         SET kind = ?, from_chapter = ?, to_chapter = ?, from_verse = ?, to_verse = ?,
             total_verses = ?, recorded_on = ?, note = ?
         WHERE id = ?",
        rusqlite::params![
            entry.kind,
            entry.range.from_chapter,
            entry.range.to_chapter,
            entry.range.from_verse,
            entry.range.to_verse,
            total as i64,
            entry.recorded_on,
            entry.note,
            entry_id,
        ],
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;

    Ok(json!({ "entry": load_entry(conn, entry_id)?.to_json() }))
}

fn tracking_delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let entry_id = req_str(req, "entryId")?;
    let changed = conn
        .execute("DELETE FROM tracking_entries WHERE id = ?", [entry_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("tracking entry not found"));
    }
    Ok(json!({ "ok": true }))
}

fn tracking_progress(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = req_str(req, "studentId")?;
    ensure_student(conn, student_id)?;
    let kind = parse_kind(opt_str(req, "kind"))?;
    let catalog = ChapterCatalog::standard();

    let entries = load_entries(conn, student_id, kind)?;
    let ranges: Vec<VerseRange> = entries.iter().map(|e| e.range).collect();
    let progress = memorization_progress(&catalog, &ranges)?;

    let mut by_kind = serde_json::Map::new();
    for k in [TrackingKind::Memorization, TrackingKind::Revision] {
        if kind.is_some_and(|only| only != k) {
            continue;
        }
        let kind_ranges: Vec<VerseRange> = entries
            .iter()
            .filter(|e| e.kind == k.as_str())
            .map(|e| e.range)
            .collect();
        let p = memorization_progress(&catalog, &kind_ranges)?;
        by_kind.insert(
            k.as_str().to_string(),
            json!({
                "entryCount": p.entry_count,
                "uniqueVersesCovered": p.unique_verses_covered,
                "percentCovered": p.percent_covered,
            }),
        );
    }

    let mut out = serde_json::to_value(&progress)
        .map_err(|e| HandlerErr::new("calc_failed", e.to_string()))?;
    out["studentId"] = json!(student_id);
    out["byKind"] = serde_json::Value::Object(by_kind);
    Ok(out)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "tracking.create" => Some(respond(&req.id, tracking_create(state, req))),
        "tracking.list" => Some(respond(&req.id, tracking_list(state, req))),
        "tracking.update" => Some(respond(&req.id, tracking_update(state, req))),
        "tracking.delete" => Some(respond(&req.id, tracking_delete(state, req))),
        "tracking.progress" => Some(respond(&req.id, tracking_progress(state, req))),
        _ => None,
    }
}
