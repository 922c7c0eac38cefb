mod accounts;
mod classifier;
mod env_config;
mod errors;
mod file_manager;
mod image_input;
mod loaded_model;
mod model_source;
mod rest_handlers;
mod utils;

use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;
use tracing_subscriber::EnvFilter;
use warp::Filter;

use crate::accounts::Accounts;
use crate::env_config::EnvConfig;
use crate::file_manager::FileManager;
use crate::loaded_model::LoadedModel;
use crate::model_source::ModelSource;

pub type AccountsDep = Arc<RwLock<Accounts>>;
pub type FileManagerDep = Arc<RwLock<FileManager>>;
pub type ModelSourceDep = Arc<ModelSource>;
pub type LoadedModelDep = Arc<RwLock<LoadedModel>>;

const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = EnvConfig::new();
    let file_manager = FileManager::new(&config.base_path)?;
    let accounts = Accounts::new(Path::new(&config.base_path))?;
    let source = ModelSource::new(config.model_path(), config.model_url.clone());

    let accounts_dep = Arc::new(RwLock::new(accounts));
    let file_manager_dep = Arc::new(RwLock::new(file_manager));
    let source_dep = Arc::new(source);
    let loaded_model_dep = Arc::new(RwLock::new(LoadedModel::new()));

    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(["GET", "POST", "OPTIONS", "DELETE"])
        .allow_header("content-type")
        .build();

    let predict_route = warp::path!("predict")
        .and(warp::post())
        .and(warp::multipart::form().max_length(MAX_UPLOAD_BYTES))
        .and(with_model_source(&source_dep))
        .and(with_loaded_model(&loaded_model_dep))
        .and(with_file_manager(&file_manager_dep))
        .and_then(rest_handlers::predict);

    let register_route = warp::path!("register")
        .and(warp::post())
        .and(warp::body::json::<accounts::RegisterInput>())
        .and(with_accounts(&accounts_dep))
        .and_then(rest_handlers::register);

    let login_route = warp::path!("login")
        .and(warp::post())
        .and(warp::body::json::<accounts::LoginInput>())
        .and(with_accounts(&accounts_dep))
        .and_then(rest_handlers::login);

    let routes = predict_route.or(register_route).or(login_route).with(cors);

    info!(port = config.port, "serving");
    warp::serve(routes)
        .run((config.host_address, config.port))
        .await;
    Ok(())
}

macro_rules! dep_filter {
    ($x:ty) => {
        impl Filter<Extract = ($x,), Error = Infallible> + Clone
    };
}

fn with_accounts(instance: &AccountsDep) -> dep_filter![AccountsDep] {
    let instance = instance.clone();
    warp::any().map(move || instance.clone())
}

fn with_file_manager(instance: &FileManagerDep) -> dep_filter![FileManagerDep] {
    let instance = instance.clone();
    warp::any().map(move || instance.clone())
}

fn with_model_source(instance: &ModelSourceDep) -> dep_filter![ModelSourceDep] {
    let instance = instance.clone();
    warp::any().map(move || instance.clone())
}

fn with_loaded_model(instance: &LoadedModelDep) -> dep_filter![LoadedModelDep] {
    let instance = instance.clone();
    warp::any().map(move || instance.clone())
}
