//! Order-preserving fixed-size chunking

/// Splits a list into consecutive chunks of at most `size` elements
///
/// Order is preserved; every chunk but the last has exactly `size` elements
/// and the last has between 1 and `size`. An empty input yields no chunks.
/// `size` must be positive (guaranteed by config validation).
pub fn chunk_list<T: Clone>(data: &[T], size: usize) -> Vec<Vec<T>> {
    assert!(size > 0, "chunk size must be positive");
    data.chunks(size).map(|chunk| chunk.to_vec()).collect()
}
