use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};

use super::{EncodeError, TextEncoder, EMBEDDING_DIMENSION};

const MAX_SEQ_LEN: usize = 256;

/// Download the ONNX export of a sentence-encoder repo from HuggingFace.
pub async fn download_model(model_dir: &Path, model_repo: &str) -> Result<PathBuf> {
    let model_path = model_dir.join("model.onnx");
    if model_path.exists() {
        tracing::info!("encoder model already exists at {:?}", model_path);
        return Ok(model_path);
    }

    std::fs::create_dir_all(model_dir).context("Failed to create model directory")?;

    let url = format!(
        "https://huggingface.co/{}/resolve/main/onnx/model.onnx",
        model_repo
    );
    tracing::info!("Downloading encoder model from {}", url);

    let client = reqwest::Client::new();
    let resp = client
        .get(&url)
        .send()
        .await
        .context("Failed to download encoder model")?;
    anyhow::ensure!(
        resp.status().is_success(),
        "Download failed with status: {}",
        resp.status()
    );

    let bytes = resp.bytes().await.context("Failed to read model bytes")?;
    std::fs::write(&model_path, &bytes).context("Failed to write model file")?;

    tracing::info!("Encoder model saved to {:?} ({} bytes)", model_path, bytes.len());
    Ok(model_path)
}

/// Sentence encoder backed by ONNX Runtime.
///
/// Pools token states into one vector by attention-masked mean, the way
/// the MiniLM sentence-transformer family is meant to be read, then
/// L2-normalizes so cosine reduces to a dot product of unit vectors.
pub struct MiniLmEncoder {
    session: Mutex<ort::session::Session>,
    tokenizer: tokenizers::Tokenizer,
}

impl MiniLmEncoder {
    /// Load the ONNX model from `model_dir` and the tokenizer from disk,
    /// falling back to a pretrained download keyed by `model_repo`.
    pub fn new(model_dir: &Path, model_repo: &str) -> Result<Self> {
        let model_path = model_dir.join("model.onnx");
        anyhow::ensure!(
            model_path.exists(),
            "ONNX model not found at {:?}. Run download_model() first.",
            model_path
        );

        let session = ort::session::Session::builder()
            .context("Failed to create ONNX session builder")?
            .commit_from_file(&model_path)
            .context("Failed to load ONNX model")?;

        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = if tokenizer_path.exists() {
            tokenizers::Tokenizer::from_file(&tokenizer_path)
                .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?
        } else {
            let tok = tokenizers::Tokenizer::from_pretrained(model_repo, None)
                .map_err(|e| anyhow::anyhow!("Failed to download tokenizer: {}", e))?;
            let _ = tok.save(&tokenizer_path, false);
            tok
        };

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
        })
    }

    fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?;

        let ids = encoding.get_ids();
        let mask = encoding.get_attention_mask();

        let len = ids.len().min(MAX_SEQ_LEN);
        let token_ids: Vec<i64> = ids[..len].iter().map(|&x| x as i64).collect();
        let attention_mask: Vec<i64> = mask[..len].iter().map(|&x| x as i64).collect();

        let input_ids = ort::value::Tensor::from_array(([1, len], token_ids.into_boxed_slice()))
            .context("Failed to create input_ids tensor")?;
        let attn_mask =
            ort::value::Tensor::from_array(([1, len], attention_mask.clone().into_boxed_slice()))
                .context("Failed to create attention_mask tensor")?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow::anyhow!("encoder session poisoned"))?;
        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attn_mask
            ])
            .context("ONNX inference failed")?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .context("Failed to extract output tensor")?;

        anyhow::ensure!(shape.len() == 3, "Unexpected output shape: {:?}", shape);
        anyhow::ensure!(
            data.len() == attention_mask.len() * EMBEDDING_DIMENSION,
            "Unexpected output size: {} values for {} tokens",
            data.len(),
            attention_mask.len()
        );

        Ok(mean_pool(data, &attention_mask, EMBEDDING_DIMENSION))
    }
}

/// Attention-masked mean over the token axis, L2-normalized.
fn mean_pool(token_states: &[f32], attention_mask: &[i64], dim: usize) -> Vec<f32> {
    let mut pooled = vec![0.0f32; dim];
    let mut count = 0.0f32;
    for (token, &mask) in attention_mask.iter().enumerate() {
        if mask == 0 {
            continue;
        }
        count += 1.0;
        let offset = token * dim;
        for (i, value) in pooled.iter_mut().enumerate() {
            *value += token_states[offset + i];
        }
    }
    if count > 0.0 {
        for value in pooled.iter_mut() {
            *value /= count;
        }
    }
    let norm = pooled.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in pooled.iter_mut() {
            *value /= norm;
        }
    }
    pooled
}

impl TextEncoder for MiniLmEncoder {
    fn encode(&self, text: &str) -> Result<Vec<f32>, EncodeError> {
        self.embed_text(text).map_err(|e| EncodeError(e.to_string()))
    }
}
