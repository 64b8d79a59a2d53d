//! Integration tests for embedding extraction, freeze semantics, the
//! merged vocabulary, and pretrained checkpoint loading.

use candle_core::{Device, Tensor};

use ume_encoder::tokenization::RESERVED_TOKEN_MARKER;
use ume_encoder::{
    EncodedBatch, EncoderConfig, Modality, ModelSize, PaddingMode, UmeEncoder, UmeError,
};

fn encoder() -> UmeEncoder {
    let config = EncoderConfig {
        model_size: ModelSize::Mini,
        max_length: 64,
        seed: 5,
        ..EncoderConfig::default()
    };
    UmeEncoder::with_device(config, Some("cpu")).unwrap()
}

#[test]
fn aggregated_embeddings_have_hidden_dim_shape() {
    let encoder = encoder();
    let embeddings =
        encoder.embed_sequences(&["MKT"], Modality::AminoAcid, true).unwrap();
    assert_eq!(embeddings.dims(), &[1, encoder.embedding_dim()]);
}

#[test]
fn token_level_embeddings_include_special_tokens() {
    let encoder = encoder();
    let embeddings =
        encoder.embed_sequences(&["MKT"], Modality::AminoAcid, false).unwrap();
    // 3 residues plus <cls> and <eos>.
    assert_eq!(embeddings.dims(), &[1, 5, encoder.embedding_dim()]);
}

#[test]
fn batched_sequences_share_one_padded_length() {
    let encoder = encoder();
    let embeddings = encoder
        .embed_sequences(&["ATGCATGC", "GCTA"], Modality::Nucleotide, false)
        .unwrap();
    assert_eq!(embeddings.dims(), &[2, 10, encoder.embedding_dim()]);
}

#[test]
fn embed_rejects_multi_view_batches() {
    let encoder = encoder();
    let aa = encoder
        .get_tokenizer(Modality::AminoAcid)
        .unwrap()
        .transform(&["MKTV"], encoder.device())
        .unwrap();
    let nt = encoder
        .get_tokenizer(Modality::Nucleotide)
        .unwrap()
        .transform(&["ACGT"], encoder.device())
        .unwrap();
    let combined = EncodedBatch::combine(&[aa, nt]).unwrap();

    let err = encoder.embed(&combined, true).unwrap_err();
    assert!(matches!(err, UmeError::InvalidInput(_)));
}

#[test]
fn rank_two_inputs_are_normalized_before_embedding() {
    let encoder = encoder();
    let device = encoder.device().clone();

    let ids = Tensor::from_slice(&[0u32, 25, 26, 1], (1, 4), &device).unwrap();
    let mask = Tensor::from_slice(&[1u32, 1, 1, 1], (1, 4), &device).unwrap();
    let batch =
        EncodedBatch::new(ids, mask, vec![vec![Modality::AminoAcid]]).unwrap();

    let embeddings = encoder.embed(&batch, true).unwrap();
    assert_eq!(embeddings.dims(), &[1, encoder.embedding_dim()]);
}

#[test]
fn frozen_encoder_detaches_embeddings_from_the_graph() {
    let mut encoder = encoder();
    let parameters = encoder.backbone().parameters();
    assert!(!parameters.is_empty());

    encoder.freeze();
    assert!(encoder.is_frozen());

    let embeddings =
        encoder.embed_sequences(&["ACDEFGHIK"], Modality::AminoAcid, true).unwrap();
    let grads = embeddings.sum_all().unwrap().backward().unwrap();
    assert!(
        grads.get(parameters[0].as_tensor()).is_none(),
        "frozen embeddings must not carry gradients back to the backbone"
    );

    encoder.unfreeze();
    assert!(!encoder.is_frozen());

    let embeddings =
        encoder.embed_sequences(&["ACDEFGHIK"], Modality::AminoAcid, true).unwrap();
    let grads = embeddings.sum_all().unwrap().backward().unwrap();
    assert!(
        grads.get(parameters[0].as_tensor()).is_some(),
        "unfreezing must restore gradient flow"
    );
}

#[test]
fn frozen_and_unfrozen_embeddings_agree_in_value() {
    let mut encoder = encoder();
    let before = encoder.embed_sequences(&["CCO"], Modality::Smiles, true).unwrap();
    encoder.freeze();
    let after = encoder.embed_sequences(&["CCO"], Modality::Smiles, true).unwrap();

    let a: Vec<Vec<f32>> = before.to_vec2().unwrap();
    let b: Vec<Vec<f32>> = after.to_vec2().unwrap();
    assert_eq!(a, b);
}

#[test]
fn vocab_is_sorted_with_no_reserved_entries() {
    let encoder = encoder();
    let vocab = encoder.get_vocab();

    let ids: Vec<u32> = vocab.keys().copied().collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted);

    assert!(vocab.values().all(|token| !token.contains(RESERVED_TOKEN_MARKER)));
    assert!(!vocab.is_empty());
}

#[test]
fn modalities_lists_every_supported_name() {
    let encoder = encoder();
    let names = encoder.modalities();
    for expected in ["amino_acid", "nucleotide", "SMILES", "3d_coordinates"] {
        assert!(names.contains(&expected), "missing modality {expected}");
    }
}

#[test]
fn unpadded_architecture_produces_the_same_shapes() {
    let config = EncoderConfig {
        model_size: ModelSize::Mini,
        max_length: 64,
        use_flash_attn: Some(true),
        ..EncoderConfig::default()
    };
    let encoder = UmeEncoder::with_device(config, Some("cpu")).unwrap();
    assert_eq!(encoder.architecture().padding, PaddingMode::Unpadded);

    let embeddings =
        encoder.embed_sequences(&["ACGT", "TTAA"], Modality::Nucleotide, false).unwrap();
    assert_eq!(embeddings.dims(), &[2, 6, encoder.embedding_dim()]);

    let pooled = encoder.embed_sequences(&["ACGT"], Modality::Nucleotide, true).unwrap();
    assert_eq!(pooled.dims(), &[1, encoder.embedding_dim()]);
}

#[test]
fn unknown_pretrained_name_fails_with_available_models() {
    let err = UmeEncoder::from_pretrained("ume-xl-base-7B", Some("cpu"), None).unwrap_err();
    match err {
        UmeError::UnknownModel { name, available } => {
            assert_eq!(name, "ume-xl-base-7B");
            assert!(available.contains(&"ume-mini-base-12M".to_string()));
        }
        other => panic!("expected UnknownModel, got {other:?}"),
    }
}

#[test]
fn invalid_device_request_fails_fast() {
    let config = EncoderConfig::default();
    let err = UmeEncoder::with_device(config, Some("tpu")).unwrap_err();
    assert!(matches!(err, UmeError::Device(_)));
}

#[test]
fn embeddings_are_deterministic_for_a_seeded_encoder() {
    let a = encoder().embed_sequences(&["MKTV"], Modality::AminoAcid, true).unwrap();
    let b = encoder().embed_sequences(&["MKTV"], Modality::AminoAcid, true).unwrap();

    let va: Vec<Vec<f32>> = a.to_vec2().unwrap();
    let vb: Vec<Vec<f32>> = b.to_vec2().unwrap();
    assert_eq!(va, vb);
}

#[test]
fn device_is_cpu_when_requested() {
    let encoder = encoder();
    assert!(matches!(encoder.device(), Device::Cpu));
}
