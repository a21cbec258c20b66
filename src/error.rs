//! Memory Management Errors
//!
//! Define os erros recuperáveis das operações de memória. Violações de
//! invariante (corrupção, double-free, `Pool::put` de índice livre) não
//! passam por aqui — elas são fatais e viram `panic!` direto no ponto de
//! detecção (ver `heap::Heap::validate` e `pool::Pool::validate`).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmError {
    /// `align` não é potência de 2, ou `align_offset` não é múltiplo do
    /// alinhamento mínimo de payload.
    InvalidArgument,
    /// Espaço de endereçamento do heap esgotado (sem handler de OOM instalado,
    /// ou o handler devolveu o controle em vez de abortar).
    OutOfMemory,
    /// Reservado para `Heap::validate` reportar uma invariante violada sem
    /// abortar o processo — nunca retornado pelas operações fatais em si.
    Corruption,
}

pub type MmResult<T> = Result<T, MmError>;
