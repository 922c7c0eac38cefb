use std::env::var;
use std::path::PathBuf;

#[derive(Debug)]
pub struct EnvConfig {
    pub base_path: String,
    pub host_address: [u8; 4],
    pub port: u16,
    pub model_url: String,
}

fn get_path(name: &str, default: &str) -> String {
    let value = var(name).unwrap_or_else(|_| default.to_owned());
    match value.strip_suffix('/') {
        Some(value) => value.to_owned(),
        None => value,
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvConfig {
    pub fn new() -> Self {
        let base_path = get_path("MOUNTED_PATH", "./data");
        let host_address = var("HOST_ADDRESS").unwrap_or_else(|_| "127.0.0.1".to_owned());
        let host_address: Vec<u8> = host_address.split('.').map(|o| o.parse().unwrap()).collect();
        let port = var("PORT").unwrap_or_else(|_| "8000".to_owned()).parse().unwrap();
        let model_url = var("MODEL_URL").expect("MODEL_URL must be defined as an env variable");

        Self {
            base_path,
            host_address: host_address.try_into().unwrap(),
            port,
            model_url,
        }
    }

    /// Well-known local location of the classifier artifact.
    pub fn model_path(&self) -> PathBuf {
        PathBuf::from(&self.base_path)
            .join("ml_model")
            .join("leukemia_cnn_model.onnx")
    }
}
