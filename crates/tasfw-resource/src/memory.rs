//! In-process simulation backed by a plain byte buffer.
//!
//! [`MemoryResource`] is the reference [`Resource`]: a fixed-size memory, a
//! symbol table declared up front, and a step function that mutates the
//! memory once per frame. The frame counter symbol is incremented after each
//! step, so restoring memory also restores the step counter.
//!
//! It is used to drive the script engine without a compiled simulation
//! module, and as the workload for the snapshot benchmarks.

use std::collections::HashMap;

use crate::{Resource, ResourceError};

// ---------------------------------------------------------------------------
// SymbolTable
// ---------------------------------------------------------------------------

/// Symbol name -> address map, resolved once when the resource is built.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: HashMap<String, usize>,
}

impl SymbolTable {
    /// Look up a symbol.
    pub fn get(&self, name: &str) -> Option<usize> {
        self.symbols.get(name).copied()
    }

    /// Number of symbols in the table.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Whether the table has no symbols.
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub(crate) fn insert(&mut self, name: String, addr: usize) {
        self.symbols.insert(name, addr);
    }
}

impl FromIterator<(String, usize)> for SymbolTable {
    fn from_iter<I: IntoIterator<Item = (String, usize)>>(iter: I) -> Self {
        Self {
            symbols: iter.into_iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// StepFn
// ---------------------------------------------------------------------------

/// A step function advancing the simulation by one frame.
///
/// Receives the whole memory and the symbol table. All simulation state must
/// live in the memory; a step function keeps nothing between calls.
pub type StepFn = fn(&mut [u8], &SymbolTable);

fn no_step(_memory: &mut [u8], _symbols: &SymbolTable) {}

// ---------------------------------------------------------------------------
// MemoryResource
// ---------------------------------------------------------------------------

/// A [`Resource`] implemented entirely in process.
pub struct MemoryResource {
    memory: Vec<u8>,
    symbols: SymbolTable,
    step: StepFn,
    frame_counter: Option<usize>,
}

impl MemoryResource {
    /// Start building a resource with `size` bytes of zeroed memory.
    pub fn builder(size: usize) -> MemoryResourceBuilder {
        MemoryResourceBuilder {
            size,
            symbols: Vec::new(),
            step: no_step,
            frame_counter: None,
            init: Vec::new(),
        }
    }

    /// The resolved symbol table.
    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }
}

impl Resource for MemoryResource {
    fn addr(&self, symbol: &str) -> Result<usize, ResourceError> {
        self.symbols
            .get(symbol)
            .ok_or_else(|| ResourceError::UnknownSymbol {
                name: symbol.to_owned(),
            })
    }

    fn memory(&self) -> &[u8] {
        &self.memory
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }

    fn advance(&mut self) -> Result<(), ResourceError> {
        (self.step)(&mut self.memory, &self.symbols);
        if let Some(addr) = self.frame_counter {
            let bytes: [u8; 4] = self.memory[addr..addr + 4]
                .try_into()
                .map_err(|_| ResourceError::Crashed("frame counter unreadable".to_owned()))?;
            let next = u32::from_le_bytes(bytes).wrapping_add(1);
            self.memory[addr..addr + 4].copy_from_slice(&next.to_le_bytes());
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryResource")
            .field("size", &self.memory.len())
            .field("symbols", &self.symbols.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for [`MemoryResource`].
pub struct MemoryResourceBuilder {
    size: usize,
    symbols: Vec<(String, usize)>,
    step: StepFn,
    frame_counter: Option<String>,
    init: Vec<(usize, Vec<u8>)>,
}

impl MemoryResourceBuilder {
    /// Declare a symbol at `addr`.
    pub fn symbol(mut self, name: &str, addr: usize) -> Self {
        self.symbols.push((name.to_owned(), addr));
        self
    }

    /// Set the per-frame step function.
    pub fn step(mut self, step: StepFn) -> Self {
        self.step = step;
        self
    }

    /// Name the `u32` symbol that [`advance`](Resource::advance) increments
    /// after every step.
    pub fn frame_counter(mut self, symbol: &str) -> Self {
        self.frame_counter = Some(symbol.to_owned());
        self
    }

    /// Write `bytes` at `addr` before the first frame.
    pub fn init(mut self, addr: usize, bytes: &[u8]) -> Self {
        self.init.push((addr, bytes.to_vec()));
        self
    }

    /// Validate every declared address and build the resource.
    ///
    /// # Errors
    ///
    /// - [`ResourceError::OutOfBounds`] if a symbol or initial write lies
    ///   outside the memory.
    /// - [`ResourceError::UnknownSymbol`] if the frame counter names an
    ///   undeclared symbol.
    pub fn build(self) -> Result<MemoryResource, ResourceError> {
        let size = self.size;
        let check = |addr: usize, len: usize| {
            if addr.checked_add(len).is_some_and(|end| end <= size) {
                Ok(())
            } else {
                Err(ResourceError::OutOfBounds { addr, len, size })
            }
        };

        let mut symbols = SymbolTable::default();
        for (name, addr) in self.symbols {
            check(addr, 1)?;
            symbols.insert(name, addr);
        }

        let frame_counter = match self.frame_counter {
            Some(name) => {
                let addr = symbols
                    .get(&name)
                    .ok_or(ResourceError::UnknownSymbol { name })?;
                check(addr, 4)?;
                Some(addr)
            }
            None => None,
        };

        let mut memory = vec![0u8; size];
        for (addr, bytes) in self.init {
            check(addr, bytes.len())?;
            memory[addr..addr + bytes.len()].copy_from_slice(&bytes);
        }

        tracing::debug!(
            size,
            symbols = symbols.len(),
            "in-process simulation memory created"
        );

        Ok(MemoryResource {
            memory,
            symbols,
            step: self.step,
            frame_counter,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
