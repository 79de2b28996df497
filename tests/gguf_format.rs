//! GGUF container integration tests
//!
//! Parse-level invariants over synthesized files: reparse idempotence,
//! inspector bookkeeping (histogram counts, offset/size bounds), and
//! rejection of malformed input.

use inferir::gguf::{self, ggml_type_traits, tensor_nbytes, GGUFLoader};
use inferir::test_factory::{build_tiny_model, GGUFBuilder, TinyModelSpec};
use inferir::InferirError;
use std::io::Write;

fn write_temp(bytes: &[u8]) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(bytes).unwrap();
    f.flush().unwrap();
    f
}

#[test]
fn reparse_yields_identical_structure() {
    let bytes = build_tiny_model(&TinyModelSpec::default());
    let a = gguf::parse(&bytes).unwrap();
    let b = gguf::parse(&bytes).unwrap();
    assert_eq!(a, b);

    // Order is preserved, not just the index contents
    let names_a: Vec<&str> = a.tensors.iter().map(|t| t.name.as_str()).collect();
    let names_b: Vec<&str> = b.tensors.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names_a, names_b);
}

#[test]
fn dtype_histogram_counts_match_tensor_count() {
    let bytes = build_tiny_model(&TinyModelSpec::default());
    let file = gguf::parse(&bytes).unwrap();

    let mut total = 0u64;
    let mut hist = std::collections::BTreeMap::new();
    for t in &file.tensors {
        let name = ggml_type_traits(t.ggml_type).map_or("UNKNOWN", |tr| tr.name);
        *hist.entry(name).or_insert(0u64) += 1;
    }
    for count in hist.values() {
        total += count;
    }
    assert_eq!(total, file.header.tensor_count);
}

#[test]
fn every_tensor_range_fits_the_file() {
    let bytes = build_tiny_model(&TinyModelSpec::default());
    let f = write_temp(&bytes);
    let loader = GGUFLoader::open(f.path()).unwrap();
    let file = loader.file();

    for (i, t) in file.tensors.iter().enumerate() {
        let abs_off = file.data_section_offset + t.offset;
        assert!(abs_off >= file.data_section_offset);
        let size = tensor_nbytes(t)
            .unwrap()
            .unwrap_or_else(|| loader.size_from_offsets(i));
        assert!(
            abs_off + size <= bytes.len() as u64,
            "tensor {} overruns the file",
            t.name
        );
    }
}

#[test]
fn bad_magic_is_rejected() {
    let mut bytes = build_tiny_model(&TinyModelSpec::default());
    bytes[..4].copy_from_slice(b"GGU\0");
    let err = gguf::parse(&bytes).unwrap_err();
    assert!(matches!(err, InferirError::BadMagic { .. }));
}

#[test]
fn truncated_tensor_data_is_rejected() {
    let bytes = build_tiny_model(&TinyModelSpec::default());
    // Drop the tail of the data section: the last tensor now overruns
    let truncated = &bytes[..bytes.len() - 64];
    let err = gguf::parse(truncated).unwrap_err();
    assert!(matches!(err, InferirError::OutOfBounds { .. }));
}

#[test]
fn truncated_directory_is_rejected() {
    let bytes = build_tiny_model(&TinyModelSpec::default());
    let file = gguf::parse(&bytes).unwrap();
    // Cut inside the metadata/directory region, before the data section
    let cut = (file.data_section_offset / 2) as usize;
    assert!(gguf::parse(&bytes[..cut]).is_err());
}

#[test]
fn tokenizer_arrays_survive_as_summaries() {
    let bytes = build_tiny_model(&TinyModelSpec::default());
    let file = gguf::parse(&bytes).unwrap();
    match file.kv("tokenizer.ggml.tokens") {
        Some(gguf::GGUFValue::Array(summary)) => {
            assert_eq!(summary.elem_type, gguf::ValueType::String);
            assert_eq!(summary.len, 3);
        },
        other => panic!("expected array summary, got {other:?}"),
    }
}

#[test]
fn metadata_order_is_preserved() {
    let bytes = GGUFBuilder::new()
        .metadata_u32("z.last", 1)
        .metadata_u32("a.first", 2)
        .metadata_u32("m.middle", 3)
        .build();

    let file = gguf::parse(&bytes).unwrap();
    let keys: Vec<&str> = file.metadata.iter().map(|kv| kv.key.as_str()).collect();
    assert_eq!(keys, vec!["z.last", "a.first", "m.middle"]);
}

#[test]
fn loader_open_propagates_bad_magic() {
    let mut bytes = build_tiny_model(&TinyModelSpec::default());
    bytes[0] = b'X';
    let f = write_temp(&bytes);
    let err = GGUFLoader::open(f.path()).unwrap_err();
    assert!(matches!(err, InferirError::BadMagic { .. }));
}
