//! Embedding-based semantic filter.
//!
//! At construction, one centroid vector per intent group is computed as the
//! mean embedding of the group's description and few-shot examples. At query
//! time the last user message is embedded and compared against every
//! centroid by cosine similarity; the argmax group wins when it clears the
//! policy threshold, otherwise the default group applies. The matched
//! group's allow-list (explicit, or discovered from model capabilities)
//! intersects the candidates; an empty intersection fails open and returns
//! the original candidates, so semantic routing narrows but never blocks.
//!
//! The classifier core is generic over an [`Embedder`] so it runs under test
//! with a stub; the ONNX-backed embedder (fixed sequence length 128,
//! embedding dimension 384, mean pooling over non-padded positions, a single
//! mutex around the session) lives behind the `onnx` feature.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::catalog::ModelCatalog;
use crate::config::{IntentGroup, SemanticPolicy};
use crate::error::GatewayError;
use crate::routing::filters::defaults::effective_groups;
use crate::routing::filters::{FilterInput, ProviderFilter};
use crate::traits::{ChatProvider, ChatRole};

/// Text-to-vector contract for the classifier.
///
/// Embedding calls are sequential by design; implementations serialize
/// internally and need not be reentrant.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, GatewayError>;
}

/// Cosine similarity between two vectors; 0 when either has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += *x as f64 * *y as f64;
        norm_a += *x as f64 * *x as f64;
        norm_b += *y as f64 * *y as f64;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Centroid-based intent classifier.
pub struct EmbeddingFilter {
    policy: SemanticPolicy,
    groups: Vec<IntentGroup>,
    catalog: Arc<ModelCatalog>,
    embedder: Box<dyn Embedder>,
    centroids: HashMap<String, Vec<f32>>,
}

impl EmbeddingFilter {
    /// Build the filter, pre-computing every group centroid.
    pub fn new(
        policy: SemanticPolicy,
        catalog: Arc<ModelCatalog>,
        embedder: Box<dyn Embedder>,
    ) -> Result<Self, GatewayError> {
        let groups = effective_groups(&policy);
        let mut centroids = HashMap::new();

        for group in &groups {
            let mut texts: Vec<&str> = Vec::new();
            if !group.description.is_empty() {
                texts.push(&group.description);
            }
            texts.extend(group.examples.iter().map(String::as_str));

            let keyword_fallback;
            if texts.is_empty() && !group.keywords.is_empty() {
                keyword_fallback = group.keywords.join(" ");
                texts.push(&keyword_fallback);
            }
            if texts.is_empty() {
                continue;
            }

            let mut centroid: Option<Vec<f32>> = None;
            for text in &texts {
                let embedding = embedder.embed(text).map_err(|e| {
                    GatewayError::Config(format!(
                        "failed to embed text for group {}: {e}",
                        group.name
                    ))
                })?;
                match &mut centroid {
                    Some(sum) => {
                        for (s, v) in sum.iter_mut().zip(embedding.iter()) {
                            *s += v;
                        }
                    }
                    None => centroid = Some(embedding),
                }
            }

            if let Some(mut centroid) = centroid {
                let n = texts.len() as f32;
                for value in &mut centroid {
                    *value /= n;
                }
                centroids.insert(group.name.clone(), centroid);
            }
        }

        Ok(Self {
            policy,
            groups,
            catalog,
            embedder,
            centroids,
        })
    }

    /// Classify a prompt into a group name.
    fn classify(&self, text: &str) -> Result<String, GatewayError> {
        let embedding = self.embedder.embed(text)?;

        let mut best_group = self.policy.default_group.clone();
        let mut max_sim = -1.0f64;
        for (name, centroid) in &self.centroids {
            let sim = cosine_similarity(&embedding, centroid);
            debug!(group = %name, score = sim, "semantic similarity");
            if sim > max_sim {
                max_sim = sim;
                best_group = name.clone();
            }
        }

        if max_sim < self.policy.threshold as f64 {
            info!(
                max_similarity = max_sim,
                threshold = self.policy.threshold,
                default_group = %self.policy.default_group,
                "similarity below threshold, using default group"
            );
            best_group = self.policy.default_group.clone();
        } else {
            info!(intent = %best_group, score = max_sim, "semantic match found (embedding)");
        }

        Ok(best_group)
    }

    /// Allow-list for a group: explicit, else capability discovery.
    fn allow_list(&self, group_name: &str) -> Vec<String> {
        let Some(group) = self.groups.iter().find(|g| g.name == group_name) else {
            return Vec::new();
        };
        if !group.allow_providers.is_empty() {
            return group.allow_providers.clone();
        }
        if let Some(capability) = &group.required_capability {
            return self.catalog.providers_with_capability(capability);
        }
        Vec::new()
    }
}

#[async_trait]
impl ProviderFilter for EmbeddingFilter {
    fn name(&self) -> &str {
        "semantic-embedding"
    }

    async fn filter(
        &self,
        input: FilterInput<'_>,
    ) -> Result<Vec<Arc<dyn ChatProvider>>, GatewayError> {
        if input.messages.is_empty() {
            return Ok(input.candidates);
        }

        let prompt = input
            .messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .or_else(|| input.messages.last())
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        let group = match self.classify(prompt) {
            Ok(group) => group,
            Err(err) => {
                warn!(error = %err, "intent classification failed, keeping all candidates");
                return Ok(input.candidates);
            }
        };

        let allow = self.allow_list(&group);
        if allow.is_empty() {
            return Ok(input.candidates);
        }

        let kept: Vec<Arc<dyn ChatProvider>> = input
            .candidates
            .iter()
            .filter(|p| allow.iter().any(|a| a.eq_ignore_ascii_case(p.name())))
            .cloned()
            .collect();

        // Routing fails open: an allow-list that matches none of the live
        // candidates must not kill the request.
        if kept.is_empty() {
            return Ok(input.candidates);
        }
        Ok(kept)
    }
}

/// Build the ONNX-backed embedding filter from a policy.
#[cfg(feature = "onnx")]
pub fn build_onnx_filter(
    policy: &SemanticPolicy,
    catalog: Arc<ModelCatalog>,
) -> Result<Arc<dyn ProviderFilter>, GatewayError> {
    let model_path = policy
        .model_path
        .as_deref()
        .ok_or_else(|| GatewayError::Config("embedding engine requires model_path".to_string()))?;
    let embedder = onnx::OnnxEmbedder::load(model_path)?;
    Ok(Arc::new(EmbeddingFilter::new(
        policy.clone(),
        catalog,
        Box::new(embedder),
    )?))
}

/// Without the `onnx` feature the embedding engine is unavailable; the
/// caller falls back to the keyword engine.
#[cfg(not(feature = "onnx"))]
pub fn build_onnx_filter(
    _policy: &SemanticPolicy,
    _catalog: Arc<ModelCatalog>,
) -> Result<Arc<dyn ProviderFilter>, GatewayError> {
    Err(GatewayError::Config(
        "embedding engine requires the onnx feature".to_string(),
    ))
}

#[cfg(feature = "onnx")]
mod onnx {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex;

    use ort::session::Session;
    use ort::value::Tensor;

    pub const MAX_SEQ_LEN: usize = 128;
    pub const EMBEDDING_DIM: usize = 384;

    /// Sentence embedder over a fixed-shape transformer session.
    ///
    /// The session and its input buffers are reused across calls behind one
    /// mutex; embedding is sequential by design.
    pub struct OnnxEmbedder {
        inner: Mutex<Inner>,
    }

    struct Inner {
        session: Session,
        tokenizer: tokenizers::Tokenizer,
    }

    impl OnnxEmbedder {
        pub fn load(model_path: &str) -> Result<Self, GatewayError> {
            if let Ok(lib) = std::env::var("ONNXRUNTIME_LIB_PATH") {
                std::env::set_var("ORT_DYLIB_PATH", lib);
            }

            let session = Session::builder()
                .and_then(|b| b.commit_from_file(model_path))
                .map_err(|e| {
                    GatewayError::Config(format!("failed to create onnx session: {e}"))
                })?;

            let tokenizer_path = Path::new(model_path)
                .parent()
                .map(|dir| dir.join("tokenizer.json"))
                .ok_or_else(|| {
                    GatewayError::Config("embedding model path has no parent directory".into())
                })?;
            let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path)
                .map_err(|e| GatewayError::Config(format!("failed to load tokenizer: {e}")))?;

            Ok(Self {
                inner: Mutex::new(Inner { session, tokenizer }),
            })
        }
    }

    impl Embedder for OnnxEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>, GatewayError> {
            let mut inner = self.inner.lock().expect("embedder lock poisoned");

            let encoding = inner
                .tokenizer
                .encode(text, true)
                .map_err(|e| GatewayError::Config(format!("tokenization failed: {e}")))?;

            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let type_ids = encoding.get_type_ids();
            let used = ids.len().min(MAX_SEQ_LEN);

            let mut input_ids = vec![0i64; MAX_SEQ_LEN];
            let mut attention_mask = vec![0i64; MAX_SEQ_LEN];
            let mut token_type_ids = vec![0i64; MAX_SEQ_LEN];
            for i in 0..used {
                input_ids[i] = ids[i] as i64;
                attention_mask[i] = *mask.get(i).unwrap_or(&1) as i64;
                token_type_ids[i] = *type_ids.get(i).unwrap_or(&0) as i64;
            }

            let shape = [1usize, MAX_SEQ_LEN];
            let inputs = ort::inputs![
                "input_ids" => Tensor::from_array((shape, input_ids))
                    .map_err(|e| GatewayError::Config(format!("tensor build failed: {e}")))?,
                "attention_mask" => Tensor::from_array((shape, attention_mask))
                    .map_err(|e| GatewayError::Config(format!("tensor build failed: {e}")))?,
                "token_type_ids" => Tensor::from_array((shape, token_type_ids))
                    .map_err(|e| GatewayError::Config(format!("tensor build failed: {e}")))?,
            ];

            let outputs = inner
                .session
                .run(inputs)
                .map_err(|e| GatewayError::Config(format!("embedding inference failed: {e}")))?;

            let (_, data) = outputs["last_hidden_state"]
                .try_extract_tensor::<f32>()
                .map_err(|e| GatewayError::Config(format!("output extraction failed: {e}")))?;

            // Mean pooling over the non-padded positions.
            let mut embedding = vec![0f32; EMBEDDING_DIM];
            let valid = used.max(1);
            for position in 0..valid {
                let offset = position * EMBEDDING_DIM;
                for d in 0..EMBEDDING_DIM {
                    embedding[d] += data[offset + d];
                }
            }
            for value in &mut embedding {
                *value /= valid as f32;
            }

            Ok(embedding)
        }
    }
}
