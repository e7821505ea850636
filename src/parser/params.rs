//! CSI parameter parsing
//!
//! Handles parsing of semicolon-separated numeric parameters in CSI
//! sequences. An empty field is kept as `None` ("use the default"), which is
//! different from an explicit `0`. Colon-separated sub-parameters stay
//! attached to the parameter they follow.

/// Maximum number of parameters accepted in one sequence
pub const MAX_PARAMS: usize = 32;

/// One `;`-separated parameter with its `:` sub-parameters
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Param {
    pub value: Option<u16>,
    pub subparams: Vec<Option<u16>>,
}

/// CSI parameters
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Params {
    values: Vec<Param>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse parameters from the bytes between the CSI introducer and the
    /// intermediates/final byte. Bytes other than digits, `;` and `:` are
    /// skipped. Values saturate at `u16::MAX`.
    pub fn parse(bytes: &[u8]) -> Self {
        let mut params = Self::new();
        if bytes.is_empty() {
            return params;
        }

        for group in bytes.split(|&b| b == b';').take(MAX_PARAMS) {
            let mut fields = group.split(|&b| b == b':').map(parse_field);
            let value = fields.next().flatten();
            params.values.push(Param {
                value,
                subparams: fields.collect(),
            });
        }
        params
    }

    /// Explicit value at `index`; `None` when absent or left empty
    pub fn get(&self, index: usize) -> Option<u16> {
        self.values.get(index).and_then(|p| p.value)
    }

    /// Value at `index`, or `default` when absent or empty
    pub fn get_or(&self, index: usize, default: u16) -> u16 {
        self.get(index).unwrap_or(default)
    }

    /// Repeat count at `index`: absent, empty and 0 all mean 1
    pub fn count(&self, index: usize) -> u16 {
        self.get_or(index, 1).max(1)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over parameters with their sub-parameters
    pub fn iter(&self) -> impl Iterator<Item = &Param> + '_ {
        self.values.iter()
    }

    pub fn as_slice(&self) -> &[Param] {
        &self.values
    }
}

fn parse_field(field: &[u8]) -> Option<u16> {
    let mut digits = field.iter().filter(|b| b.is_ascii_digit()).peekable();
    digits.peek()?;
    Some(digits.fold(0u16, |acc, &b| {
        acc.saturating_mul(10).saturating_add(u16::from(b - b'0'))
    }))
}
