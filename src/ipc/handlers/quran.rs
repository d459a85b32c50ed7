use crate::config::AppConfig;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{load_config, req_u32, u32_from};
use crate::ipc::types::{AppState, Request};
use crate::quran::{Chapter, ChapterCatalog, RangePolicy, VerseRange};
use serde_json::json;

/// Uses `params.catalog` when the caller supplies one, else the built-in table.
pub fn catalog_from_params(params: &serde_json::Value) -> Result<ChapterCatalog, HandlerErr> {
    let Some(raw) = params.get("catalog").filter(|v| !v.is_null()) else {
        return Ok(ChapterCatalog::standard());
    };
    let Some(items) = raw.as_array() else {
        return Err(HandlerErr::new("bad_catalog", "catalog must be an array"));
    };

    let mut chapters = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let id = item
            .get("id")
            .ok_or_else(|| HandlerErr::new("bad_catalog", format!("catalog[{}].id missing", i)))
            .and_then(|v| u32_from(v, "id"))?;
        let verse_count = item
            .get("verseCount")
            .ok_or_else(|| {
                HandlerErr::new("bad_catalog", format!("catalog[{}].verseCount missing", i))
            })
            .and_then(|v| u32_from(v, "verseCount"))?;
        let name = item
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        chapters.push(Chapter {
            id,
            verse_count,
            name,
        });
    }
    ChapterCatalog::from_chapters(chapters).map_err(|e| HandlerErr::new("bad_catalog", e.0))
}

pub fn range_from_params(params: &serde_json::Value) -> Result<VerseRange, HandlerErr> {
    Ok(VerseRange {
        from_chapter: req_u32(params, "fromChapter")?,
        to_chapter: req_u32(params, "toChapter")?,
        from_verse: req_u32(params, "fromVerse")?,
        to_verse: req_u32(params, "toVerse")?,
    })
}

fn effective_policy(state: &AppState, req: &Request) -> Result<RangePolicy, HandlerErr> {
    if let Some(v) = req.params.get("policy").filter(|v| !v.is_null()) {
        return v.as_str().and_then(RangePolicy::parse).ok_or_else(|| {
            HandlerErr::bad_params("policy must be one of: bidirectional, ascendingOnly")
        });
    }
    match state.db.as_ref() {
        Some(conn) => Ok(load_config(conn)?.range_policy),
        None => Ok(AppConfig::default().range_policy),
    }
}

fn chapters_list(req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let catalog = catalog_from_params(&req.params)?;
    let chapters: Vec<&Chapter> = catalog.chapters().collect();
    Ok(json!({
        "chapters": chapters,
        "chapterCount": catalog.len(),
        "totalVerses": catalog.total_verses(),
    }))
}

fn range_count(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let catalog = catalog_from_params(&req.params)?;
    let range = range_from_params(&req.params)?;
    let policy = effective_policy(state, req)?;

    let total = catalog.count_verses_with_policy(&range, policy)?;
    let (lo, hi) = catalog.span(&range)?;
    tracing::debug!(?range, total, "verse range counted");
    Ok(json!({
        "totalVerses": total,
        "direction": range.direction(),
        "policy": policy.as_str(),
        "span": { "from": lo, "to": hi },
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "quran.chapters.list" => Some(respond(&req.id, chapters_list(req))),
        "quran.range.count" => Some(respond(&req.id, range_count(state, req))),
        _ => None,
    }
}
