//! # Configuração do Heap/Vec/Pool
//!
//! Constantes e helpers de alinhamento compartilhados pelas três camadas.
//! Nenhum destes valores é embutido diretamente no código do heap — todos
//! passam por aqui, para que um caller com requisitos diferentes (por
//! exemplo um alvo de 32 bits) possa ver exatamente o que está sendo
//! assumido.

use core::mem::size_of;

/// Log2 do número de bins "pequenos" (bins 0..31, payload exato `i+1`
/// palavras). Mantido igual ao valor original de 5 (32 bins pequenos).
pub const LOG2_SMALL_BINS: u32 = 5;

/// Número de bins pequenos: bin `i` guarda blocos de payload exatamente
/// `i + 1` palavras.
pub const SMALL_BIN_COUNT: usize = 1 << LOG2_SMALL_BINS;

/// Número total de bins (pequenos + grandes). Os bins grandes cobrem
/// classes de tamanho geométricas (potência de 2) acima de `SMALL_BIN_COUNT`
/// palavras.
pub const TOTAL_BIN_COUNT: usize = 2 * SMALL_BIN_COUNT;

/// Número de bins "grandes".
pub const LARGE_BIN_COUNT: usize = TOTAL_BIN_COUNT - SMALL_BIN_COUNT;

/// Tamanho de uma palavra da máquina, em bytes.
pub const WORD_BYTES: usize = size_of::<usize>();

/// Tamanho mínimo de payload, em palavras, necessário para guardar o link
/// de lista livre (`prev_free_offset` + `next_free_offset`, cada um um
/// `u32`). Parametrizado a partir da largura de ponteiro do alvo em vez de
/// herdado de uma constante de palavra fixa (ver DESIGN.md, Open Question a).
#[inline]
pub const fn min_payload_words() -> usize {
    let link_bytes = 2 * size_of::<u32>();
    (link_bytes + WORD_BYTES - 1) / WORD_BYTES
}

/// Número máximo de CPUs suportadas pelo registro `percpu`.
pub const MAX_CPUS: usize = 64;

/// Alinha valor para cima ao múltiplo de `align` (que deve ser potência de 2).
#[inline(always)]
pub const fn align_up(val: usize, align: usize) -> usize {
    (val + align - 1) & !(align - 1)
}

/// Alinha valor para baixo ao múltiplo de `align`.
#[inline(always)]
pub const fn align_down(val: usize, align: usize) -> usize {
    val & !(align - 1)
}

/// Verifica se valor está alinhado a `align`.
#[inline(always)]
pub const fn is_aligned(val: usize, align: usize) -> bool {
    val & (align - 1) == 0
}

/// Arredonda `size` para cima ao múltiplo de `WORD_BYTES`.
#[inline(always)]
pub const fn round_to_word(size: usize) -> usize {
    align_up(size, WORD_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_helpers() {
        assert_eq!(align_up(10, 8), 16);
        assert_eq!(align_up(16, 8), 16);
        assert_eq!(align_down(10, 8), 8);
        assert!(is_aligned(16, 8));
        assert!(!is_aligned(10, 8));
    }

    #[test]
    fn min_payload_fits_link() {
        let words = min_payload_words();
        assert!(words * WORD_BYTES >= 2 * size_of::<u32>());
    }

    #[test]
    fn bin_layout_matches_original() {
        assert_eq!(SMALL_BIN_COUNT, 32);
        assert_eq!(TOTAL_BIN_COUNT, 64);
        assert_eq!(LARGE_BIN_COUNT, 32);
    }
}
