use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};
use tokenizers::Tokenizer;

/// XLM-RoBERTa's `<pad>` id.
const PAD_ID: u32 = 1;

/// Encodes `texts` into `[B, max_len]` id and mask tensors, truncating and
/// right-padding every row to `max_len`.
pub fn tokenize_batch(tokenizer: &Tokenizer, texts: &[String], max_len: usize, device: &Device) -> Result<(Tensor, Tensor)> {
    let mut ids = Vec::with_capacity(texts.len() * max_len);
    let mut mask = Vec::with_capacity(texts.len() * max_len);
    for text in texts {
        let enc = tokenizer.encode(text.as_str(), true).map_err(|e| anyhow!("Tokenization failed: {e}"))?;
        let len = enc.get_ids().len().min(max_len);
        ids.extend_from_slice(&enc.get_ids()[..len]);
        mask.extend_from_slice(&enc.get_attention_mask()[..len]);
        ids.extend(std::iter::repeat(PAD_ID).take(max_len - len));
        mask.extend(std::iter::repeat(0).take(max_len - len));
    }
    let input_ids = Tensor::from_vec(ids, (texts.len(), max_len), device)?;
    let attention_mask = Tensor::from_vec(mask, (texts.len(), max_len), device)?;
    Ok((input_ids, attention_mask))
}
