//! # Segregated-Fit Heap
//!
//! Um heap é uma cadeia de blocos doblemente ligada (por offset físico, via
//! `prev_words`/`prev_is_free` em cada header — ver [`block`]) sobre um
//! range de endereços contíguo cedido por um [`crate::vm::Vm`]. Blocos
//! livres também entram numa segunda estrutura: [`TOTAL_BIN_COUNT`] listas
//! ligadas ("bins"), indexadas por [`bins::bin_for_size`], com um bitmap de
//! bins não-vazios para achar o menor bin candidato em O(1) amortizado —
//! generaliza diretamente `mheap_t::free_lists` + `MHEAP_N_BINS` de
//! `clib/mheap_bootstrap.h`, com o design de bins first/second-level do
//! crate `rlsf` como segunda referência.
//!
//! Ao contrário do `mheap_t` original (que embute seu próprio header no
//! início do vetor que ele gerencia), o header do heap — cabeças de bin,
//! bitmap, contadores — vive no struct Rust [`Heap`] em si, não dentro do
//! range de endereços gerido. Só os headers de *bloco* (que precisam ser
//! endereçáveis a partir de um offset puro) ficam dentro do range.

mod bins;
mod block;
pub mod trace;

use bitflags::bitflags;

use crate::bitmap::WordBitmap;
use crate::config::{self, TOTAL_BIN_COUNT, WORD_BYTES};
use crate::error::{MmError, MmResult};
use crate::vm::{Vm, VmRegion};
use block::{BlockView, HEADER_BYTES, NONE_LINK as NONE};

/// Sentinela devolvida por [`Heap::alloc`] quando os argumentos são
/// inválidos. O heap permanece inalterado.
pub const NONE_OFFSET: usize = usize::MAX;

bitflags! {
    /// Capacidades/estado observável de um [`Heap`], devolvido por
    /// [`Heap::flags`]. Puramente informativo — nenhuma chamada de `alloc`
    /// ou `free` consulta isto para decidir comportamento.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeapFlags: u8 {
        /// Rastreamento de alocações por call-site está habilitado
        /// (sempre ausente sem a feature `trace`).
        const TRACING = 1 << 0;
        /// A região de apoio foi emprestada via [`Heap::with_backing`] em
        /// vez de reservada através de um [`Vm`].
        const BORROWED_REGION = 1 << 1;
    }
}

/// Estatísticas de ocupação, devolvidas por [`Heap::usage`].
#[derive(Debug, Clone, Copy)]
pub struct HeapUsage {
    pub capacity_bytes: usize,
    pub used_bytes: usize,
    pub free_bytes: usize,
    pub n_elts: usize,
}

fn default_oom_handler(requested_bytes: usize) -> ! {
    panic!("heap out of memory: failed to satisfy a {requested_bytes}-byte allocation");
}

/// Heap segregated-fit sobre uma região `R` cedida por um `Vm`, ou sobre um
/// slice emprestado diretamente via [`Heap::with_backing`].
pub struct Heap<R: VmRegion> {
    region: R,
    capacity: usize,
    end_cap_offset: usize,
    bin_heads: [u32; TOTAL_BIN_COUNT],
    nonempty_words: [u64; 1],
    n_elts: usize,
    oom_handler: Option<fn(usize) -> !>,
    flags: HeapFlags,
    #[cfg(feature = "trace")]
    trace: Option<trace::TraceTable>,
}

impl<R: VmRegion> Heap<R> {
    fn from_region(region: R, max_capacity: usize) -> MmResult<Self> {
        let capacity = max_capacity.min(region.capacity());
        if capacity < HEADER_BYTES {
            return Err(MmError::InvalidArgument);
        }
        let mut heap = Heap {
            region,
            capacity,
            end_cap_offset: 0,
            bin_heads: [NONE; TOTAL_BIN_COUNT],
            nonempty_words: [0u64; 1],
            n_elts: 0,
            oom_handler: None,
            flags: HeapFlags::empty(),
            #[cfg(feature = "trace")]
            trace: None,
        };
        {
            let mut cap = heap.block_at(0);
            cap.set_prev_words(None);
            cap.set_prev_free(false);
            cap.set_n_words(None);
            cap.set_free(false);
        }
        Ok(heap)
    }

    /// Reserva `capacity_bytes` através de `vm` e inicializa um heap vazio
    /// sobre essa região.
    pub fn new<V: Vm<Region = R>>(vm: V, capacity_bytes: usize) -> MmResult<Self> {
        let region = vm.reserve(capacity_bytes)?;
        Self::from_region(region, capacity_bytes)
    }

    #[inline]
    fn block_at(&self, header_offset: usize) -> BlockView {
        unsafe { BlockView::at(self.region.as_ptr(), header_offset) }
    }

    #[inline]
    fn free_link_at(&self, payload_offset: usize) -> (u32, u32) {
        unsafe {
            let ptr = self.region.as_ptr().as_ptr().add(payload_offset) as *const u32;
            (ptr.read(), ptr.add(1).read())
        }
    }

    #[inline]
    fn set_free_link_at(&mut self, payload_offset: usize, prev: u32, next: u32) {
        unsafe {
            let ptr = self.region.as_ptr().as_ptr().add(payload_offset) as *mut u32;
            ptr.write(prev);
            ptr.add(1).write(next);
        }
    }

    fn bin_push_front(&mut self, bin: usize, payload_offset: usize) {
        let head = self.bin_heads[bin];
        self.set_free_link_at(payload_offset, NONE, head);
        if head != NONE {
            let (_, head_next) = self.free_link_at(head as usize);
            self.set_free_link_at(head as usize, payload_offset as u32, head_next);
        }
        self.bin_heads[bin] = payload_offset as u32;
        WordBitmap::new(&mut self.nonempty_words, TOTAL_BIN_COUNT).set(bin, true);
    }

    fn bin_remove(&mut self, bin: usize, payload_offset: usize) {
        let (prev, next) = self.free_link_at(payload_offset);
        if prev != NONE {
            let (pprev, _) = self.free_link_at(prev as usize);
            self.set_free_link_at(prev as usize, pprev, next);
        } else {
            self.bin_heads[bin] = next;
            if next == NONE {
                WordBitmap::new(&mut self.nonempty_words, TOTAL_BIN_COUNT).set(bin, false);
            }
        }
        if next != NONE {
            let (_, nnext) = self.free_link_at(next as usize);
            self.set_free_link_at(next as usize, prev, nnext);
        }
    }

    fn normalize_args(size: usize, mut align: usize, mut align_offset: usize) -> Option<(usize, usize, usize)> {
        if align == 0 {
            align = WORD_BYTES;
        }
        if !align.is_power_of_two() {
            return None;
        }
        if align < WORD_BYTES {
            align = WORD_BYTES;
        }
        align_offset %= align;
        if !config::is_aligned(align_offset, WORD_BYTES) {
            return None;
        }
        let size_words = (config::round_to_word(size) / WORD_BYTES).max(config::min_payload_words());
        Some((size_words, align, align_offset))
    }

    /// Aloca um bloco com pelo menos `size` bytes de payload, cujo endereço
    /// `p` satisfaz `(p + align_offset) % align == 0`. Devolve o offset do
    /// payload, ou [`NONE_OFFSET`] se `align`/`align_offset` são inválidos.
    /// Se o espaço de endereçamento estiver esgotado, invoca o handler de
    /// out-of-memory (que por padrão entra em pânico e nunca retorna).
    #[track_caller]
    pub fn alloc(&mut self, size: usize, align: usize, align_offset: usize) -> usize {
        let (size_words, align, align_offset) = match Self::normalize_args(size, align, align_offset) {
            Some(v) => v,
            None => return NONE_OFFSET,
        };
        let offset = self
            .find_and_carve(size_words, align, align_offset)
            .or_else(|| self.extend_and_alloc(size_words, align, align_offset));
        match offset {
            Some(offset) => {
                #[cfg(feature = "trace")]
                self.record_alloc_trace(offset, size_words * WORD_BYTES);
                offset
            }
            None => self.call_oom(size_words * WORD_BYTES),
        }
    }

    fn call_oom(&self, requested_bytes: usize) -> ! {
        log::error!("heap allocation of {requested_bytes} bytes failed, capacity is {}", self.capacity);
        let handler = self.oom_handler.unwrap_or(default_oom_handler as fn(usize) -> !);
        handler(requested_bytes)
    }

    /// Instala um handler de out-of-memory customizado, chamado em vez do
    /// padrão (que entra em pânico) quando `alloc` não consegue satisfazer
    /// um pedido válido.
    pub fn set_oom_handler(&mut self, handler: fn(usize) -> !) {
        self.oom_handler = Some(handler);
    }

    fn find_and_carve(&mut self, size_words: usize, align: usize, align_offset: usize) -> Option<usize> {
        let mut search_from = bins::bin_for_size(size_words);
        loop {
            let bin = WordBitmap::new(&mut self.nonempty_words, TOTAL_BIN_COUNT).find_from(search_from, true)?;
            let mut cursor = self.bin_heads[bin];
            while cursor != NONE {
                let payload = cursor as usize;
                let next = self.free_link_at(payload).1;
                if let Some(offset) = self.try_carve_block(bin, payload, size_words, align, align_offset) {
                    return Some(offset);
                }
                cursor = next;
            }
            search_from = bin + 1;
            if search_from >= TOTAL_BIN_COUNT {
                return None;
            }
        }
    }

    fn try_carve_block(
        &mut self,
        bin: usize,
        payload: usize,
        size_words: usize,
        align: usize,
        align_offset: usize,
    ) -> Option<usize> {
        let s0 = payload - HEADER_BYTES;
        let block_words = self
            .block_at(s0)
            .n_words()
            .expect("free list must never contain the end-cap") as usize;
        let s1 = s0 + HEADER_BYTES + block_words * WORD_BYTES;

        let total_needed = HEADER_BYTES + size_words * WORD_BYTES;
        if total_needed > s1 - s0 {
            return None;
        }
        let min_frag = HEADER_BYTES + config::min_payload_words() * WORD_BYTES;
        let a = bump_for_leading_fragment(compute_aligned_start(s0, align, align_offset), s0, align, min_frag)?;
        let b = a + total_needed;
        if b > s1 {
            return None;
        }
        let trailing = s1 - b;
        let b = if trailing != 0 && trailing < min_frag { s1 } else { b };

        self.bin_remove(bin, payload);

        if a > s0 {
            let leading_words = ((a - s0) - HEADER_BYTES) / WORD_BYTES;
            let mut lead = self.block_at(s0);
            lead.set_n_words(Some(leading_words as u32));
            lead.set_free(true);
            self.bin_push_front(bins::bin_for_size(leading_words), s0 + HEADER_BYTES);
        }

        let alloc_words = ((b - a) - HEADER_BYTES) / WORD_BYTES;
        {
            let prev_words = if a > s0 {
                Some((((a - s0) - HEADER_BYTES) / WORD_BYTES) as u32)
            } else {
                self.block_at(s0).prev_words()
            };
            let prev_free = if a > s0 { true } else { self.block_at(s0).is_prev_free() };
            let mut alloc = self.block_at(a);
            alloc.set_prev_words(prev_words);
            alloc.set_prev_free(prev_free);
            alloc.set_n_words(Some(alloc_words as u32));
            alloc.set_free(false);
        }

        if b < s1 {
            let trailing_words = ((s1 - b) - HEADER_BYTES) / WORD_BYTES;
            let mut trail = self.block_at(b);
            trail.set_prev_words(Some(alloc_words as u32));
            trail.set_prev_free(false);
            trail.set_n_words(Some(trailing_words as u32));
            trail.set_free(true);
            self.bin_push_front(bins::bin_for_size(trailing_words), b + HEADER_BYTES);
        }

        let (last_words, last_free) = if b < s1 {
            (((s1 - b) - HEADER_BYTES) / WORD_BYTES, true)
        } else {
            (alloc_words, false)
        };
        {
            let mut next = self.block_at(s1);
            next.set_prev_words(Some(last_words as u32));
            next.set_prev_free(last_free);
        }

        self.n_elts += 1;
        Some(a + HEADER_BYTES)
    }

    fn extend_and_alloc(&mut self, size_words: usize, align: usize, align_offset: usize) -> Option<usize> {
        let end_cap = self.end_cap_offset;
        let mut s0 = end_cap;

        if self.block_at(end_cap).is_prev_free() {
            let prev_words = self.block_at(end_cap).prev_words().unwrap() as usize;
            let prev_header = end_cap - HEADER_BYTES - prev_words * WORD_BYTES;
            self.bin_remove(bins::bin_for_size(prev_words), prev_header + HEADER_BYTES);
            s0 = prev_header;
        }

        let total_needed = HEADER_BYTES + size_words * WORD_BYTES;
        let min_frag = HEADER_BYTES + config::min_payload_words() * WORD_BYTES;
        let a = bump_for_leading_fragment(compute_aligned_start(s0, align, align_offset), s0, align, min_frag)?;
        let b = a + total_needed;
        let new_end_cap = b;
        if new_end_cap + HEADER_BYTES > self.capacity {
            return None;
        }
        if self.region.map(0, new_end_cap + HEADER_BYTES).is_err() {
            return None;
        }

        if a > s0 {
            let leading_words = ((a - s0) - HEADER_BYTES) / WORD_BYTES;
            let mut lead = self.block_at(s0);
            lead.set_n_words(Some(leading_words as u32));
            lead.set_free(true);
            self.bin_push_front(bins::bin_for_size(leading_words), s0 + HEADER_BYTES);
        }

        let alloc_words = ((b - a) - HEADER_BYTES) / WORD_BYTES;
        {
            let prev_words = if a > s0 {
                Some((((a - s0) - HEADER_BYTES) / WORD_BYTES) as u32)
            } else {
                self.block_at(s0).prev_words()
            };
            let prev_free = if a > s0 { true } else { self.block_at(s0).is_prev_free() };
            let mut alloc = self.block_at(a);
            alloc.set_prev_words(prev_words);
            alloc.set_prev_free(prev_free);
            alloc.set_n_words(Some(alloc_words as u32));
            alloc.set_free(false);
        }

        {
            let mut cap = self.block_at(new_end_cap);
            cap.set_prev_words(Some(alloc_words as u32));
            cap.set_prev_free(false);
            cap.set_n_words(None);
            cap.set_free(false);
        }

        self.end_cap_offset = new_end_cap;
        self.n_elts += 1;
        Some(a + HEADER_BYTES)
    }

    /// Libera o bloco em `offset`. Funde com os vizinhos físicos livres
    /// antes de reinserir o bloco combinado no bin correspondente.
    ///
    /// # Panics
    /// Entra em pânico se `offset` já estiver livre (double free) ou não
    /// corresponder a um bloco vivo — corrupção de heap é sempre fatal.
    #[track_caller]
    pub fn free(&mut self, offset: usize) {
        let mut header = offset - HEADER_BYTES;
        assert!(!self.block_at(header).is_free(), "double free at offset {offset}");
        let words = self
            .block_at(header)
            .n_words()
            .unwrap_or_else(|| panic!("free(): offset {offset} is not a live heap block"));
        #[cfg(feature = "trace")]
        self.record_free_trace(offset);
        let mut end = header + HEADER_BYTES + words as usize * WORD_BYTES;

        if self.block_at(header).is_prev_free() {
            let prev_words = self.block_at(header).prev_words().unwrap() as usize;
            let prev_header = header - HEADER_BYTES - prev_words * WORD_BYTES;
            self.bin_remove(bins::bin_for_size(prev_words), prev_header + HEADER_BYTES);
            header = prev_header;
        }

        if let Some(next_words) = self.block_at(end).n_words() {
            if self.block_at(end).is_free() {
                self.bin_remove(bins::bin_for_size(next_words as usize), end + HEADER_BYTES);
                end = end + HEADER_BYTES + next_words as usize * WORD_BYTES;
            }
        }

        // O bloco fundido encosta no end-cap: encolhe o heap em vez de
        // inserir num bin um free block que nunca vai ser reusado antes do
        // fim do range de endereços — espelha a absorção do último bloco
        // livre feita por `extend_and_alloc` ao crescer, na direção oposta.
        if end == self.end_cap_offset {
            self.end_cap_offset = header;
            let mut cap = self.block_at(header);
            cap.set_n_words(None);
            cap.set_free(false);
            self.n_elts -= 1;
            return;
        }

        let new_words = ((end - header) - HEADER_BYTES) / WORD_BYTES;
        {
            let mut b = self.block_at(header);
            b.set_n_words(Some(new_words as u32));
            b.set_free(true);
        }
        {
            let mut next = self.block_at(end);
            next.set_prev_words(Some(new_words as u32));
            next.set_prev_free(true);
        }
        self.bin_push_front(bins::bin_for_size(new_words), header + HEADER_BYTES);
        self.n_elts -= 1;
    }

    /// Ponteiro bruto para o byte em `offset` dentro da região do heap.
    /// Containers tipados construídos sobre um heap (`crate::vec::Vector`,
    /// `crate::pool::Pool`) usam isso para transformar um offset vivo num
    /// ponteiro dereferenciável; o heap em si nunca interpreta o que está
    /// nos bytes de um payload.
    pub fn ptr_at(&self, offset: usize) -> core::ptr::NonNull<u8> {
        unsafe { core::ptr::NonNull::new_unchecked(self.region.as_ptr().as_ptr().add(offset)) }
    }

    /// Tamanho do payload (em bytes) do bloco vivo em `offset`.
    pub fn size(&self, offset: usize) -> usize {
        let header = offset - HEADER_BYTES;
        self.block_at(header)
            .n_words()
            .unwrap_or_else(|| panic!("size(): offset {offset} is not a live heap block")) as usize
            * WORD_BYTES
    }

    /// Se `offset` é o payload de um bloco atualmente alocado por este heap.
    pub fn is_heap_object(&self, offset: usize) -> bool {
        if offset < HEADER_BYTES || !config::is_aligned(offset, WORD_BYTES) {
            return false;
        }
        let mut cursor = 0usize;
        while cursor < self.end_cap_offset {
            let words = match self.block_at(cursor).n_words() {
                Some(w) => w as usize,
                None => return false,
            };
            let payload = cursor + HEADER_BYTES;
            if payload == offset {
                return !self.block_at(cursor).is_free();
            }
            cursor = payload + words * WORD_BYTES;
        }
        false
    }

    /// Visita todo bloco vivo da cadeia, na ordem física, passando
    /// `(offset do payload, bytes do payload, livre?)` ao callback.
    ///
    /// Recebe `&self`: uma realocação no *mesmo* heap a partir do callback
    /// não compila, pelo design do borrow checker — quem precisa alocar
    /// durante a iteração deve passar um heap de rascunho separado.
    pub fn for_each(&self, mut f: impl FnMut(usize, usize, bool)) {
        let mut cursor = 0usize;
        while cursor < self.end_cap_offset {
            let b = self.block_at(cursor);
            let words = b
                .n_words()
                .expect("for_each: walked past the end-cap unexpectedly");
            f(cursor + HEADER_BYTES, words as usize * WORD_BYTES, b.is_free());
            cursor += HEADER_BYTES + words as usize * WORD_BYTES;
        }
    }

    /// Estatísticas agregadas de ocupação.
    pub fn usage(&self) -> HeapUsage {
        let mut used = 0usize;
        let mut free = 0usize;
        self.for_each(|_, bytes, is_free| {
            if is_free {
                free += bytes + HEADER_BYTES;
            } else {
                used += bytes + HEADER_BYTES;
            }
        });
        HeapUsage {
            capacity_bytes: self.capacity,
            used_bytes: used,
            free_bytes: free,
            n_elts: self.n_elts,
        }
    }

    /// Verifica todas as invariantes universais do heap (cadeia de blocos
    /// consistente, sem blocos livres adjacentes, bins em sincronia com a
    /// cadeia). Entra em pânico na primeira violação encontrada.
    pub fn validate(&self) {
        let mut cursor = 0usize;
        let mut prev_words: Option<u32> = None;
        let mut prev_free = false;
        let mut first = true;
        let mut free_in_chain = 0usize;

        while cursor < self.end_cap_offset {
            let b = self.block_at(cursor);
            if first {
                assert!(b.is_first(), "validate: first block has a prev_words link");
                first = false;
            } else {
                assert_eq!(b.prev_words(), prev_words, "validate: prev_words mismatch at {cursor}");
                assert_eq!(b.is_prev_free(), prev_free, "validate: prev_is_free mismatch at {cursor}");
            }
            let words = b
                .n_words()
                .expect("validate: walked past the end-cap unexpectedly");
            if b.is_free() {
                assert!(!prev_free, "validate: two adjacent free blocks were not coalesced");
                free_in_chain += 1;
            }
            prev_words = Some(words);
            prev_free = b.is_free();
            cursor += HEADER_BYTES + words as usize * WORD_BYTES;
        }
        assert_eq!(cursor, self.end_cap_offset, "validate: chain walk missed the end-cap");

        let cap = self.block_at(self.end_cap_offset);
        assert!(cap.is_end_cap(), "validate: end-cap sentinel corrupted");
        assert_eq!(cap.prev_words(), prev_words, "validate: end-cap prev_words mismatch");
        assert_eq!(cap.is_prev_free(), prev_free, "validate: end-cap prev_is_free mismatch");

        let mut free_in_bins = 0usize;
        for bin in 0..TOTAL_BIN_COUNT {
            let mut cursor = self.bin_heads[bin];
            while cursor != NONE {
                let payload = cursor as usize;
                let b = self.block_at(payload - HEADER_BYTES);
                assert!(b.is_free(), "validate: non-free block linked into bin {bin}");
                let words = b.n_words().unwrap() as usize;
                assert_eq!(bins::bin_for_size(words), bin, "validate: {words}-word block in wrong bin {bin}");
                free_in_bins += 1;
                cursor = self.free_link_at(payload).1;
            }
        }
        assert_eq!(free_in_chain, free_in_bins, "validate: free block count mismatch between chain and bins");
    }

    /// Capacidades/estado observável deste heap.
    pub fn flags(&self) -> HeapFlags {
        self.flags
    }

    /// Envolve o heap num `spin::Mutex`, tornando-o seguro para
    /// compartilhar entre threads — o heap em si não tem sincronização
    /// própria, exatamente como `mheap_t::lock` é um campo opcional do
    /// header original, não uma propriedade intrínseca do algoritmo.
    pub fn into_thread_safe(self) -> ThreadSafeHeap<R> {
        ThreadSafeHeap(spin::Mutex::new(self))
    }
}

impl<'a> Heap<crate::vm::BorrowedRegion<'a>> {
    /// Constrói um heap sobre um slice emprestado, sem passar por um `Vm`.
    /// Mapeamento de página fica desabilitado: a região inteira já está
    /// residente por construção.
    pub fn with_backing(slice: &'a mut [u8]) -> MmResult<Self> {
        let capacity = slice.len();
        let mut heap = Self::from_region(crate::vm::BorrowedRegion::new(slice), capacity)?;
        heap.flags.insert(HeapFlags::BORROWED_REGION);
        Ok(heap)
    }
}

#[cfg(feature = "trace")]
impl<R: VmRegion> Heap<R> {
    /// Habilita (ou desabilita) o rastreamento de alocações por call-site.
    pub fn trace(&mut self, enable: bool) {
        if enable {
            self.trace.get_or_insert_with(trace::TraceTable::new);
            self.flags.insert(HeapFlags::TRACING);
        } else {
            self.trace = None;
            self.flags.remove(HeapFlags::TRACING);
        }
    }

    /// Relatório das alocações vivas agrupadas por call-site, se o
    /// rastreamento estiver habilitado.
    pub fn trace_report(&self) -> Option<trace::TraceReport> {
        self.trace.as_ref().map(trace::TraceTable::report)
    }

    #[track_caller]
    fn record_alloc_trace(&mut self, offset: usize, bytes: usize) {
        if let Some(t) = self.trace.as_mut() {
            t.record_alloc(offset, core::panic::Location::caller(), bytes);
        }
    }

    fn record_free_trace(&mut self, offset: usize) {
        if let Some(t) = self.trace.as_mut() {
            t.record_free(offset);
        }
    }
}

fn compute_aligned_start(s0: usize, align: usize, align_offset: usize) -> usize {
    let target = s0 + HEADER_BYTES + align_offset;
    let aligned_target = config::align_up(target, align);
    aligned_target - HEADER_BYTES - align_offset
}

fn bump_for_leading_fragment(mut a: usize, s0: usize, align: usize, min_frag: usize) -> Option<usize> {
    if a == s0 {
        return Some(a);
    }
    // Uma vez que `a` passou de `s0`, o gap só cresce a cada bump — nunca
    // mais volta a zero — então o número de bumps necessários para alcançar
    // `min_frag` é limitado por `min_frag / align`, não por uma constante
    // fixa (que quebra em alvos de 32 bits, onde `align` pode ser bem menor
    // que `min_frag`).
    let max_bumps = min_frag / align + 2;
    for _ in 0..max_bumps {
        let gap = a - s0;
        if gap >= min_frag {
            return Some(a);
        }
        a += align;
    }
    None
}

/// `Heap<R>` envolto num `spin::Mutex`, devolvido por [`Heap::into_thread_safe`].
pub struct ThreadSafeHeap<R: VmRegion>(spin::Mutex<Heap<R>>);

impl<R: VmRegion> ThreadSafeHeap<R> {
    pub fn lock(&self) -> spin::MutexGuard<'_, Heap<R>> {
        self.0.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::StdVm;

    fn new_heap(capacity: usize) -> Heap<crate::vm::StdRegion> {
        Heap::new(StdVm, capacity).unwrap()
    }

    #[test]
    fn alloc_free_roundtrip() {
        let mut heap = new_heap(4096);
        let off = heap.alloc(64, 8, 0);
        assert_ne!(off, NONE_OFFSET);
        assert!(heap.size(off) >= 64);
        assert!(heap.is_heap_object(off));
        heap.validate();
        heap.free(off);
        assert!(!heap.is_heap_object(off));
        heap.validate();
    }

    #[test]
    fn aligned_allocation_honors_offset() {
        let mut heap = new_heap(8192);
        let off = heap.alloc(48, 64, 16);
        assert_ne!(off, NONE_OFFSET);
        assert_eq!((off + 16) % 64, 0);
        heap.validate();
    }

    #[test]
    fn invalid_alignment_returns_sentinel() {
        let mut heap = new_heap(4096);
        assert_eq!(heap.alloc(16, 3, 0), NONE_OFFSET);
    }

    #[test]
    fn bump_for_leading_fragment_scales_past_a_32_bit_sized_gap() {
        // align=4, min_frag=16 mimics a 32-bit target, where the fixed
        // 4-bump bound used to run out before reaching a valid gap.
        let s0 = 0usize;
        let a = s0 + 1;
        assert_eq!(bump_for_leading_fragment(a, s0, 4, 16), Some(17));
    }

    #[test]
    fn bump_for_leading_fragment_accepts_a_zero_gap_immediately() {
        assert_eq!(bump_for_leading_fragment(100, 100, 8, 32), Some(100));
    }

    #[test]
    fn bump_for_leading_fragment_finds_first_valid_gap_for_uneven_align() {
        // align doesn't evenly divide min_frag here, exercising the bound
        // computed from min_frag/align rather than a round number of bumps.
        let s0 = 0usize;
        let a = s0 + 1;
        assert_eq!(bump_for_leading_fragment(a, s0, 6, 16), Some(19));
    }

    #[test]
    fn freeing_the_last_block_truncates_instead_of_binning() {
        let mut heap = new_heap(65536);
        let a = heap.alloc(32, 8, 0);
        let b = heap.alloc(32, 8, 0);
        heap.validate();

        heap.free(b);
        heap.validate();
        assert_eq!(
            heap.usage().free_bytes,
            0,
            "freeing the tail block should shrink the end-cap, not leave a free block behind"
        );

        // The reclaimed tail space should be available to a fresh alloc
        // again (the end-cap moved back, it wasn't leaked).
        let c = heap.alloc(32, 8, 0);
        assert_ne!(c, NONE_OFFSET);
        heap.validate();

        heap.free(c);
        heap.free(a);
        heap.validate();
        assert_eq!(heap.usage().used_bytes, 0);
        assert_eq!(heap.usage().free_bytes, 0);
    }

    #[test]
    fn freeing_adjacent_blocks_coalesces() {
        let mut heap = new_heap(65536);
        let a = heap.alloc(32, 8, 0);
        let b = heap.alloc(32, 8, 0);
        let c = heap.alloc(32, 8, 0);
        heap.free(b);
        heap.validate();
        heap.free(a);
        heap.validate();
        heap.free(c);
        heap.validate();
        let usage = heap.usage();
        assert_eq!(usage.n_elts, 0);
    }

    #[test]
    fn double_free_panics() {
        let mut heap = new_heap(4096);
        let off = heap.alloc(32, 8, 0);
        heap.free(off);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| heap.free(off)));
        assert!(result.is_err());
    }

    #[test]
    fn with_backing_uses_caller_owned_storage() {
        let mut storage = [0u8; 2048];
        let mut heap = Heap::with_backing(&mut storage).unwrap();
        let off = heap.alloc(100, 16, 0);
        assert_ne!(off, NONE_OFFSET);
        heap.validate();
        assert!(heap.flags().contains(HeapFlags::BORROWED_REGION));
    }

    #[test]
    fn reserved_heap_has_no_borrowed_flag() {
        let heap = new_heap(4096);
        assert!(!heap.flags().contains(HeapFlags::BORROWED_REGION));
    }
}
