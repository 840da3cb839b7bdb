use indexmap::IndexMap;

use crate::{error::Result, AsmError, LineId};

pub const GLOBAL_ZONE: &str = "GLOBAL";

pub fn is_valid_zone_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// A zone's name and range, detached from its cursor so bytecode parts can hold on to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneBounds {
    pub name: String,
    pub start: i64,
    pub end: i64,
}

impl ZoneBounds {
    pub fn contains(&self, address: i64) -> bool {
        (self.start..=self.end).contains(&address)
    }

    pub fn check(&self, address: i64, line: &LineId) -> Result<i64> {
        if !self.contains(address) {
            return Err(AsmError::OutsideZone {
                line: line.clone(),
                value: address,
                zone: self.name.clone(),
                start: self.start,
                end: self.end,
            });
        }
        Ok(address)
    }
}

#[derive(Debug, Clone)]
pub struct MemoryZone {
    address_bits: u32,
    bounds: ZoneBounds,
    current: i64,
}

impl MemoryZone {
    pub fn new(address_bits: u32, start: i64, end: i64, name: &str) -> Result<Self> {
        if !(1..=63).contains(&address_bits) {
            return Err(AsmError::config(format!(
                "address size of {address_bits} bits is not supported"
            )));
        }
        let max = (1i64 << address_bits) - 1;
        if end > max {
            return Err(AsmError::config(format!(
                "end ${end:X} of memory zone `{name}` does not fit a {address_bits}-bit address space"
            )));
        }
        if start < 0 || start > end {
            return Err(AsmError::config(format!(
                "start ${start:X} of memory zone `{name}` is past its end ${end:X}"
            )));
        }
        Ok(Self {
            address_bits,
            bounds: ZoneBounds {
                name: name.to_string(),
                start,
                end,
            },
            current: start,
        })
    }

    pub fn address_bits(&self) -> u32 {
        self.address_bits
    }

    pub fn name(&self) -> &str {
        &self.bounds.name
    }

    pub fn start(&self) -> i64 {
        self.bounds.start
    }

    pub fn end(&self) -> i64 {
        self.bounds.end
    }

    pub fn bounds(&self) -> &ZoneBounds {
        &self.bounds
    }

    pub fn current_address(&self) -> i64 {
        self.current
    }

    pub fn set_current_address(&mut self, address: i64, line: &LineId) -> Result<()> {
        if !self.bounds.contains(address) {
            return Err(AsmError::Zone {
                line: line.clone(),
                msg: format!(
                    "address ${address:X} is outside memory zone `{}` [${:X}, ${:X}]",
                    self.bounds.name, self.bounds.start, self.bounds.end
                ),
            });
        }
        self.current = address;
        Ok(())
    }

    /// Claims `words` addresses at the cursor and returns where they start.
    ///
    /// Once the last address of the zone is claimed, the cursor rests one past `end` and any
    /// further non-empty claim fails.
    pub fn claim(&mut self, words: usize, line: &LineId) -> Result<i64> {
        let address = self.current;
        if words == 0 {
            return Ok(address);
        }
        let last = address + words as i64 - 1;
        if last > self.bounds.end {
            return Err(AsmError::Zone {
                line: line.clone(),
                msg: format!(
                    "{words} word(s) at ${address:X} overflow memory zone `{}` ending at ${:X}",
                    self.bounds.name, self.bounds.end
                ),
            });
        }
        self.current = last + 1;
        Ok(address)
    }
}

#[derive(Debug, Clone)]
pub struct MemoryZoneManager {
    address_bits: u32,
    zones: IndexMap<String, MemoryZone>,
}

impl MemoryZoneManager {
    /// Creates the manager with its `GLOBAL` zone spanning the whole address space, its cursor
    /// placed at `origin`.
    pub fn new(address_bits: u32, origin: i64) -> Result<Self> {
        let mut global = MemoryZone::new(address_bits, 0, (1i64 << address_bits.min(63)) - 1, GLOBAL_ZONE)?;
        global.set_current_address(origin, &LineId::config())?;
        let mut zones = IndexMap::new();
        zones.insert(GLOBAL_ZONE.to_string(), global);
        Ok(Self {
            address_bits,
            zones,
        })
    }

    pub fn address_bits(&self) -> u32 {
        self.address_bits
    }

    pub fn global_zone(&self) -> &MemoryZone {
        &self.zones[0]
    }

    pub fn zone(&self, name: &str) -> Option<&MemoryZone> {
        self.zones.get(name)
    }

    pub fn zone_mut(&mut self, name: &str) -> Option<&mut MemoryZone> {
        self.zones.get_mut(name)
    }

    pub fn zones(&self) -> impl Iterator<Item = &MemoryZone> {
        self.zones.values()
    }

    /// Bounds of `name`, or of the global zone when no name is given.
    pub fn bounds(&self, name: Option<&str>, line: &LineId) -> Result<ZoneBounds> {
        let name = name.unwrap_or(GLOBAL_ZONE);
        self.zone(name)
            .map(|zone| zone.bounds().clone())
            .ok_or_else(|| AsmError::UnknownZone {
                line: line.clone(),
                name: name.to_string(),
            })
    }

    pub fn create_zone(&mut self, name: &str, start: i64, end: i64, line: &LineId) -> Result<()> {
        let fail = |msg: String| AsmError::Zone {
            line: line.clone(),
            msg,
        };
        if !is_valid_zone_name(name) {
            return Err(fail(format!("invalid memory zone name `{name}`")));
        }
        if self.zones.contains_key(name) {
            return Err(fail(format!("memory zone `{name}` already exists")));
        }
        let zone = MemoryZone::new(self.address_bits, start, end, name).map_err(|e| match e {
            AsmError::Config(msg) => fail(msg),
            e => e,
        })?;
        tracing::debug!("{line}: created memory zone `{name}` [${start:X}, ${end:X}]");
        self.zones.insert(name.to_string(), zone);
        Ok(())
    }

    /// Resolves an `.org` request. With a zone the value is an offset from the zone start.
    pub fn org_address(&self, zone: Option<&str>, value: i64, line: &LineId) -> Result<i64> {
        let address = match zone {
            Some(name) => {
                let bounds = self.bounds(Some(name), line)?;
                let address = bounds.start.checked_add(value).ok_or_else(|| AsmError::Overflow {
                    line: line.clone(),
                    msg: format!("org offset {value} overflows"),
                })?;
                bounds.check(address, line)?
            }
            None => value,
        };
        self.global_zone().bounds().check(address, line)
    }
}
