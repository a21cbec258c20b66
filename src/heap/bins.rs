//! # Bin Indexing
//!
//! Mapeia um tamanho de payload (em palavras) ao índice do bin que o heap
//! deve consultar primeiro. Os 32 bins pequenos guardam tamanhos exatos
//! (bin `i` = payload de exatamente `i + 1` palavras); os 32 bins grandes
//! cobrem faixas geométricas (potência de 2), igual ao `mheap_t::free_lists`
//! original (`MHEAP_LOG2_SMALL_BINS` / `MHEAP_SMALL_BINS` / `MHEAP_N_BINS`
//! em `clib/mheap_bootstrap.h`) e ao esquema first-level/second-level do
//! crate `rlsf`.
//!
//! A busca em `Heap::alloc` sempre parte de `bin_for_size(tamanho pedido)`
//! e sobe; para isso funcionar, todo bloco inserido num bin via
//! `bin_for_size` precisa ter payload >= ao mínimo representável por esse
//! bin, e bins de índice maior nunca podem representar um mínimo menor —
//! ambas as propriedades são verificadas em `bin_is_monotonic`.

use crate::config::{LARGE_BIN_COUNT, LOG2_SMALL_BINS, SMALL_BIN_COUNT, TOTAL_BIN_COUNT};

/// Bin canônico para um payload de `words` palavras (>= 1).
pub fn bin_for_size(words: usize) -> usize {
    debug_assert!(words >= 1);
    if words <= SMALL_BIN_COUNT {
        return words - 1;
    }
    let log2w = floor_log2(words);
    let k = log2w.saturating_sub(LOG2_SMALL_BINS as usize);
    let bin = SMALL_BIN_COUNT + k;
    bin.min(TOTAL_BIN_COUNT - 1)
}

/// Menor payload (em palavras) que um bin pode conter. Usado só por testes
/// e pela validação de monotonicidade; `alloc`/`free` nunca precisam
/// inverter `bin_for_size`.
fn bin_min_words(bin: usize) -> usize {
    if bin < SMALL_BIN_COUNT {
        bin + 1
    } else if bin == SMALL_BIN_COUNT {
        // `SMALL_BIN_COUNT` palavras exatas já mapeiam ao último bin
        // pequeno; o primeiro valor que canonicamente cai no primeiro bin
        // grande é `SMALL_BIN_COUNT + 1`.
        SMALL_BIN_COUNT + 1
    } else {
        let k = bin - SMALL_BIN_COUNT;
        1usize << (LOG2_SMALL_BINS as usize + k)
    }
}

fn floor_log2(v: usize) -> usize {
    (usize::BITS - 1 - v.leading_zeros()) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_bins_are_exact() {
        for words in 1..=SMALL_BIN_COUNT {
            assert_eq!(bin_for_size(words), words - 1);
        }
    }

    #[test]
    fn large_bins_are_geometric() {
        assert_eq!(bin_for_size(SMALL_BIN_COUNT + 1), SMALL_BIN_COUNT);
        assert_eq!(bin_for_size(2 * SMALL_BIN_COUNT - 1), SMALL_BIN_COUNT);
        assert_eq!(bin_for_size(2 * SMALL_BIN_COUNT), SMALL_BIN_COUNT + 1);
    }

    #[test]
    fn huge_sizes_clamp_to_last_bin() {
        assert_eq!(bin_for_size(usize::MAX / 2), TOTAL_BIN_COUNT - 1);
    }

    #[test]
    fn bin_is_monotonic() {
        let mut last_min = 0;
        for bin in 0..TOTAL_BIN_COUNT {
            let min_words = bin_min_words(bin);
            assert!(min_words >= last_min);
            assert_eq!(bin_for_size(min_words), bin, "bin {bin} owns {min_words}");
            last_min = min_words;
        }
        assert_eq!(LARGE_BIN_COUNT, TOTAL_BIN_COUNT - SMALL_BIN_COUNT);
    }
}
