use crate::state::AppState;
use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::stream::{self, Stream};
use prompty_core::Error;
use prompty_executor::{ArtifactStore, Executor};
use prompty_jobs::{expand_job, ExpanderConfig, JobDocument};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::convert::Infallible;
use std::sync::Arc;

fn job_expander_config() -> ExpanderConfig<'static> {
    ExpanderConfig { lora_root: "/loras", range_increment: 0.1, default_params: Map::new() }
}

fn error_response(err: Error) -> (StatusCode, Json<Value>) {
    let status = match &err {
        Error::Config(_) | Error::Wildcard(_) | Error::Extension(_) | Error::Lora(_) | Error::BlockTree(_) => {
            StatusCode::BAD_REQUEST
        }
        Error::Yaml(_) | Error::Json(_) => StatusCode::BAD_REQUEST,
        Error::Hook { .. } | Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": err.to_string() })))
}

pub async fn list_jobs(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let jobs = prompty_config::list_jobs(&state.workspace_root);
    let map: Map<String, Value> = jobs
        .into_iter()
        .map(|(id, summary)| (id, serde_json::to_value(summary).unwrap_or(Value::Null)))
        .collect();
    Json(json!({ "jobs": map }))
}

pub async fn get_job(State(state): State<Arc<AppState>>, AxumPath(job_id): AxumPath<String>) -> impl IntoResponse {
    match prompty_config::load_job(&state.workspace_root, &job_id) {
        Ok((doc, _raw)) => {
            let mut value = serde_json::to_value(&doc).unwrap_or(Value::Null);
            if let Value::Object(map) = &mut value {
                map.insert("job_id".to_string(), Value::String(job_id));
                map.insert("valid".to_string(), Value::Bool(true));
            }
            (StatusCode::OK, Json(value)).into_response()
        }
        Err(err) => error_response(err).into_response(),
    }
}

pub async fn list_extensions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let tree = build_extension_tree(&prompty_config::ext_dir(&state.workspace_root));
    Json(tree)
}

fn build_extension_tree(dir: &std::path::Path) -> Value {
    let mut files = Vec::new();
    let mut subdirs = Map::new();

    let Ok(entries) = std::fs::read_dir(dir) else {
        return json!({ "_files": files });
    };
    let mut paths: Vec<_> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    paths.sort();

    for path in paths {
        if path.is_dir() {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
            subdirs.insert(name, build_extension_tree(&path));
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default().to_string();
        let (id, text_count, wildcard_count) = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_yaml::from_str::<Value>(&raw) {
                Ok(value) => {
                    let id = value.get("id").and_then(|v| v.as_str()).unwrap_or(&stem).to_string();
                    let text_count = count_text_entries(&value);
                    let wildcard_count =
                        value.get("wildcards").and_then(|v| v.as_array()).map(Vec::len).unwrap_or(0);
                    (id, text_count, wildcard_count)
                }
                Err(_) => (stem.clone(), 0, 0),
            },
            Err(_) => (stem.clone(), 0, 0),
        };
        files.push(json!({
            "file": path.file_name().and_then(|n| n.to_str()).unwrap_or_default(),
            "id": id,
            "textCount": text_count,
            "wildcardCount": wildcard_count,
        }));
    }

    let mut out = Map::new();
    out.insert("_files".to_string(), Value::Array(files));
    for (name, subtree) in subdirs {
        out.insert(name, subtree);
    }
    Value::Object(out)
}

fn count_text_entries(value: &Value) -> usize {
    let mut total = 0;
    if let Some(obj) = value.as_object() {
        for (key, v) in obj {
            if key == "text" || key.starts_with("text") {
                match v {
                    Value::Array(items) => total += items.len(),
                    Value::String(_) => total += 1,
                    _ => {}
                }
            }
        }
    }
    total
}

pub async fn get_extension(
    State(state): State<Arc<AppState>>,
    AxumPath(path): AxumPath<String>,
) -> impl IntoResponse {
    let relative = path.replace('.', "/");
    let mut file_path = prompty_config::ext_dir(&state.workspace_root).join(&relative);
    if file_path.extension().is_none() {
        file_path.set_extension("yaml");
    }

    let Ok(raw) = std::fs::read_to_string(&file_path) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": format!("extension '{path}' not found") })))
            .into_response();
    };
    let Ok(mut value) = serde_yaml::from_str::<Value>(&raw) else {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "extension file is not valid YAML" })))
            .into_response();
    };
    if let Value::Object(map) = &mut value {
        map.insert("_path".to_string(), Value::String(path));
        map.insert(
            "_file".to_string(),
            Value::String(file_path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string()),
        );
    }
    (StatusCode::OK, Json(value)).into_response()
}

#[derive(Deserialize)]
pub struct PreviewBody {
    job_id: String,
    #[serde(default)]
    job_data: Option<Value>,
    #[serde(default)]
    composition_id: u64,
}

pub async fn preview(State(state): State<Arc<AppState>>, Json(body): Json<PreviewBody>) -> impl IntoResponse {
    let doc: JobDocument = match body.job_data {
        Some(job_data) => match serde_json::from_value(job_data) {
            Ok(doc) => doc,
            Err(e) => return error_response(Error::config(e.to_string())).into_response(),
        },
        None => match prompty_config::load_job(&state.workspace_root, &body.job_id) {
            Ok((doc, _)) => doc,
            Err(err) => return error_response(err).into_response(),
        },
    };
    let extensions = match prompty_config::load_extension_table(&state.workspace_root, &body.job_id) {
        Ok(ext) => ext,
        Err(err) => return error_response(err).into_response(),
    };
    let cfg = job_expander_config();
    match expand_job(&doc, &extensions, &cfg, body.composition_id) {
        Ok(records) => Json(json!({
            "total_jobs": records.len(),
            "block_paths": records.iter().map(|r| r.block_path.to_string()).collect::<Vec<_>>(),
            "records": records,
        }))
        .into_response(),
        Err(err) => error_response(err).into_response(),
    }
}

#[derive(Deserialize)]
pub struct ValidateBody {
    #[serde(default)]
    job_id: Option<String>,
    #[serde(default)]
    job_data: Option<Value>,
}

pub async fn validate(State(state): State<Arc<AppState>>, Json(body): Json<ValidateBody>) -> impl IntoResponse {
    let doc_result: Result<JobDocument, _> = if let Some(job_id) = &body.job_id {
        prompty_config::load_job(&state.workspace_root, job_id).map(|(doc, _)| doc)
    } else if let Some(job_data) = body.job_data {
        serde_json::from_value(job_data).map_err(|e| Error::config(e.to_string()))
    } else {
        Err(Error::config("request must include 'job_id' or 'job_data'"))
    };

    match doc_result {
        Ok(doc) => {
            let report = prompty_config::validate_job(&doc, &prompty_config::ext_dir(&state.workspace_root));
            Json(report).into_response()
        }
        Err(err) => error_response(err).into_response(),
    }
}

#[derive(Deserialize)]
pub struct ExportBody {
    job_id: String,
    job_data: Value,
}

pub async fn export(State(state): State<Arc<AppState>>, Json(body): Json<ExportBody>) -> impl IntoResponse {
    let doc: serde_yaml::Value = match serde_yaml::to_value(&body.job_data) {
        Ok(v) => v,
        Err(e) => return error_response(Error::config(e.to_string())).into_response(),
    };

    let yaml = match prompty_config::job_to_yaml(&doc) {
        Ok(yaml) => yaml,
        Err(err) => return error_response(err).into_response(),
    };
    let job_dir = prompty_config::job_dir(&state.workspace_root, &body.job_id);
    let now = chrono::Utc::now().timestamp();
    match prompty_config::export_job(&job_dir, &yaml, now) {
        Ok(()) => Json(json!({ "status": "saved" })).into_response(),
        Err(err) => error_response(err).into_response(),
    }
}

pub async fn get_session(State(state): State<Arc<AppState>>, AxumPath(job_id): AxumPath<String>) -> impl IntoResponse {
    let job_dir = prompty_config::job_dir(&state.workspace_root, &job_id);
    Json(prompty_config::read_session(&job_dir))
}

#[derive(Deserialize)]
pub struct SessionSaveBody {
    prompt_id: String,
    data: prompty_config::PromptState,
}

pub async fn save_session(
    State(state): State<Arc<AppState>>,
    AxumPath(job_id): AxumPath<String>,
    Json(body): Json<SessionSaveBody>,
) -> impl IntoResponse {
    let job_dir = prompty_config::job_dir(&state.workspace_root, &job_id);
    match prompty_config::save_prompt_state(&job_dir, &body.prompt_id, body.data) {
        Ok(()) => Json(json!({ "status": "saved" })).into_response(),
        Err(err) => error_response(err).into_response(),
    }
}

pub async fn list_operations(
    State(state): State<Arc<AppState>>,
    AxumPath(job_id): AxumPath<String>,
) -> impl IntoResponse {
    let job_dir = prompty_config::job_dir(&state.workspace_root, &job_id);
    Json(json!({ "operations": prompty_config::list_operations(&job_dir) }))
}

pub async fn get_operation(
    State(state): State<Arc<AppState>>,
    AxumPath((job_id, name)): AxumPath<(String, String)>,
) -> impl IntoResponse {
    let job_dir = prompty_config::job_dir(&state.workspace_root, &job_id);
    match prompty_config::load_operation(&job_dir, &name) {
        Ok(op) => Json(json!({ "name": op.name, "mappings": op.mappings })).into_response(),
        Err(err) => error_response(err).into_response(),
    }
}

pub async fn save_operation(
    State(state): State<Arc<AppState>>,
    AxumPath((job_id, name)): AxumPath<(String, String)>,
    Json(mappings): Json<prompty_config::Mappings>,
) -> impl IntoResponse {
    let job_dir = prompty_config::job_dir(&state.workspace_root, &job_id);
    match prompty_config::save_operation(&job_dir, &name, mappings) {
        Ok(()) => Json(json!({ "status": "saved" })).into_response(),
        Err(err) => error_response(err).into_response(),
    }
}

pub async fn get_artifacts(
    State(state): State<Arc<AppState>>,
    AxumPath(job_id): AxumPath<String>,
) -> impl IntoResponse {
    let manifest_path = prompty_config::artifacts_dir(&state.workspace_root, &job_id).join("manifest.json");
    match std::fs::read_to_string(&manifest_path) {
        Ok(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(value) => Json(value).into_response(),
            Err(_) => Json(json!({ "artifacts": {}, "message": "No artifacts found" })).into_response(),
        },
        Err(_) => Json(json!({ "artifacts": {}, "message": "No artifacts found" })).into_response(),
    }
}

#[derive(Deserialize)]
pub struct ArtifactQuery {
    line: Option<String>,
}

fn content_type_for(path: &std::path::Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => "application/json",
        Some("jsonl") => "application/x-ndjson",
        Some("txt") => "text/plain",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("csv") => "text/csv",
        _ => "application/octet-stream",
    }
}

pub async fn get_artifact_file(
    State(state): State<Arc<AppState>>,
    AxumPath((job_id, mod_id, filename)): AxumPath<(String, String, String)>,
    Query(query): Query<ArtifactQuery>,
) -> impl IntoResponse {
    let path = prompty_config::artifacts_dir(&state.workspace_root, &job_id).join(&mod_id).join(&filename);
    let Ok(raw) = std::fs::read_to_string(&path) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "artifact not found" }))).into_response();
    };

    if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
        if let Some(line_param) = query.line {
            let Ok(line_no) = line_param.parse::<usize>() else {
                return (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid 'line' parameter" })))
                    .into_response();
            };
            return match raw.lines().nth(line_no) {
                Some(line) => match serde_json::from_str::<Value>(line) {
                    Ok(value) => Json(value).into_response(),
                    Err(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "malformed NDJSON line" })))
                            .into_response()
                    }
                },
                None => (StatusCode::NOT_FOUND, Json(json!({ "error": "line out of range" }))).into_response(),
            };
        }
    }

    ([(axum::http::header::CONTENT_TYPE, content_type_for(&path))], raw).into_response()
}

#[derive(Deserialize)]
pub struct RunQuery {
    prompt_id: Option<String>,
    #[serde(default)]
    composition_id: u64,
}

pub async fn pipeline_run(
    State(state): State<Arc<AppState>>,
    AxumPath(job_id): AxumPath<String>,
    Query(query): Query<RunQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let job_dir = prompty_config::job_dir(&state.workspace_root, &job_id);
    let project_root = state.workspace_root.clone();

    let setup = (|| -> prompty_core::Result<_> {
        let (doc, _raw) = prompty_config::load_job(&state.workspace_root, &job_id)?;
        let extensions = prompty_config::load_extension_table(&state.workspace_root, &job_id)?;
        let cfg = job_expander_config();
        let mut records = expand_job(&doc, &extensions, &cfg, query.composition_id)?;
        if let Some(prompt_id) = &query.prompt_id {
            records.retain(|r| &r.prompt.id == prompt_id);
        }
        Ok(records)
    })();

    let bus = prompty_events::EventBus::default();
    let rx = bus.subscribe();

    match setup {
        Ok(records) if !records.is_empty() => {
            let block_paths: Vec<String> = {
                let mut seen = std::collections::BTreeSet::new();
                for r in &records {
                    seen.insert(r.block_path.to_string());
                }
                seen.into_iter().collect()
            };
            bus.emit(prompty_events::PipelineEvent::Init {
                job_id: job_id.clone(),
                prompt_id: query.prompt_id.clone(),
                block_paths: block_paths.into_iter().map(prompty_core::BlockPath::new).collect(),
                total_jobs: records.len(),
            });

            let store = ArtifactStore::new(prompty_config::artifacts_dir(&state.workspace_root, &job_id));
            let mut executor =
                Executor::new(records, job_dir, project_root, state.builtins.clone(), bus, store);
            let cancel_token = executor.cancellation_token();
            state.active_runs.insert(job_id.clone(), cancel_token);

            let run_job_id = job_id.clone();
            let run_prompt_id = query.prompt_id.clone();
            let run_state = state.clone();
            tokio::spawn(async move {
                executor.execute(&run_job_id, run_prompt_id.as_deref()).await;
                run_state.active_runs.remove(&run_job_id);
            });
        }
        Ok(_) => {
            bus.emit(prompty_events::PipelineEvent::Error {
                message: format!("no jobs found for prompt {:?}", query.prompt_id),
            });
        }
        Err(err) => {
            bus.emit(prompty_events::PipelineEvent::Error { message: err.to_string() });
        }
    }

    let stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let sse_event =
                        Event::default().event(event.name()).json_data(event.data()).unwrap_or_default();
                    return Some((Ok(sse_event), rx));
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub async fn pipeline_stop(
    State(state): State<Arc<AppState>>,
    AxumPath(job_id): AxumPath<String>,
) -> impl IntoResponse {
    match state.active_runs.get(&job_id) {
        Some(token) => {
            token.cancel();
            Json(json!({ "status": "stopping" })).into_response()
        }
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": "no active run for this job" }))).into_response(),
    }
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "workspace": state.workspace_root.display().to_string(),
        "active_runs": state.active_runs.len(),
    }))
}
