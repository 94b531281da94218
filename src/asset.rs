/// Assets supported for peer-to-peer transfers. The validator and the
/// execution engine both resolve symbols through this one type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Asset {
    Eth,
    Pyusd,
}

impl Asset {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol.to_uppercase().as_str() {
            "ETH" => Some(Asset::Eth),
            "PYUSD" => Some(Asset::Pyusd),
            _ => None,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Asset::Eth => "ETH",
            Asset::Pyusd => "PYUSD",
        }
    }

    pub fn decimals(&self) -> u32 {
        match self {
            Asset::Eth => 18,
            Asset::Pyusd => 6,
        }
    }
}
