//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::str::FromStr;

use serde::{Deserialize, Serialize};

// Route source protocols, in increasing order of preference value.
//
// When the same prefix is announced by multiple protocols, the RIB selects the
// route whose protocol compares lowest.
#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    DIRECT,
    STATIC,
    OSPFV2,
    BGP,
}

// ===== impl Protocol =====

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::DIRECT => write!(f, "direct"),
            Protocol::STATIC => write!(f, "static"),
            Protocol::OSPFV2 => write!(f, "ospfv2"),
            Protocol::BGP => write!(f, "bgp"),
        }
    }
}

impl FromStr for Protocol {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_ref() {
            "direct" | "connected" => Ok(Protocol::DIRECT),
            "static" => Ok(Protocol::STATIC),
            "ospfv2" => Ok(Protocol::OSPFV2),
            "bgp" => Ok(Protocol::BGP),
            _ => Err(()),
        }
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preference_order() {
        assert!(Protocol::DIRECT < Protocol::STATIC);
        assert!(Protocol::STATIC < Protocol::OSPFV2);
        assert!(Protocol::OSPFV2 < Protocol::BGP);
    }

    #[test]
    fn parse() {
        assert_eq!("connected".parse(), Ok(Protocol::DIRECT));
        assert_eq!("OSPFv2".parse(), Ok(Protocol::OSPFV2));
        assert_eq!("rip".parse::<Protocol>(), Err(()));
    }
}
