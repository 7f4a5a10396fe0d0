use anyhow::anyhow;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// The delivery guarantees a single encapsulated packet asks for. The numeric value is the 3 bit
///  code in the top bits of the encapsulated packet's flag byte.
///
/// NB: No variant is both ordered and sequenced
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum Reliability {
    Unreliable = 0,
    UnreliableSequenced = 1,
    Reliable = 2,
    ReliableOrdered = 3,
    ReliableSequenced = 4,
    UnreliableWithAckReceipt = 5,
    ReliableWithAckReceipt = 6,
    ReliableOrderedWithAckReceipt = 7,
}

impl Reliability {
    pub const ALL: [Reliability; 8] = [
        Reliability::Unreliable,
        Reliability::UnreliableSequenced,
        Reliability::Reliable,
        Reliability::ReliableOrdered,
        Reliability::ReliableSequenced,
        Reliability::UnreliableWithAckReceipt,
        Reliability::ReliableWithAckReceipt,
        Reliability::ReliableOrderedWithAckReceipt,
    ];

    pub fn from_code(code: u8) -> anyhow::Result<Reliability> {
        Reliability::try_from_primitive(code)
            .map_err(|_| anyhow!("invalid reliability code {}", code))
    }

    pub fn code(self) -> u8 {
        self.into()
    }

    pub fn is_reliable(self) -> bool {
        matches!(self,
            Reliability::Reliable
            | Reliability::ReliableOrdered
            | Reliability::ReliableSequenced
            | Reliability::ReliableWithAckReceipt
            | Reliability::ReliableOrderedWithAckReceipt)
    }

    pub fn is_ordered(self) -> bool {
        matches!(self, Reliability::ReliableOrdered | Reliability::ReliableOrderedWithAckReceipt)
    }

    pub fn is_sequenced(self) -> bool {
        matches!(self, Reliability::UnreliableSequenced | Reliability::ReliableSequenced)
    }

    /// Sequenced packets carry an ordering channel and index as well
    pub fn has_ordering_info(self) -> bool {
        self.is_ordered() || self.is_sequenced()
    }

    /// The number of header bytes this mode adds to the fixed 3 byte encapsulated header (flags
    ///  and bit length), not counting split metadata
    pub fn header_extra_bytes(self) -> usize {
        let mut result = 0;
        if self.is_reliable() {
            result += 3;
        }
        if self.is_sequenced() {
            result += 3;
        }
        if self.has_ordering_info() {
            result += 4;
        }
        result
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::unreliable(0, Reliability::Unreliable, false, false, false, 0)]
    #[case::unreliable_sequenced(1, Reliability::UnreliableSequenced, false, false, true, 7)]
    #[case::reliable(2, Reliability::Reliable, true, false, false, 3)]
    #[case::reliable_ordered(3, Reliability::ReliableOrdered, true, true, false, 7)]
    #[case::reliable_sequenced(4, Reliability::ReliableSequenced, true, false, true, 10)]
    #[case::unreliable_ack_receipt(5, Reliability::UnreliableWithAckReceipt, false, false, false, 0)]
    #[case::reliable_ack_receipt(6, Reliability::ReliableWithAckReceipt, true, false, false, 3)]
    #[case::reliable_ordered_ack_receipt(7, Reliability::ReliableOrderedWithAckReceipt, true, true, false, 7)]
    fn test_catalog(
        #[case] code: u8,
        #[case] expected: Reliability,
        #[case] reliable: bool,
        #[case] ordered: bool,
        #[case] sequenced: bool,
        #[case] extra_bytes: usize,
    ) {
        let mode = Reliability::from_code(code).unwrap();
        assert_eq!(mode, expected);
        assert_eq!(mode.code(), code);
        assert_eq!(mode.is_reliable(), reliable);
        assert_eq!(mode.is_ordered(), ordered);
        assert_eq!(mode.is_sequenced(), sequenced);
        assert_eq!(mode.header_extra_bytes(), extra_bytes);
    }

    #[test]
    fn test_never_ordered_and_sequenced() {
        for mode in Reliability::ALL {
            assert!(!(mode.is_ordered() && mode.is_sequenced()), "{:?}", mode);
        }
    }

    #[rstest]
    #[case(8)]
    #[case(0xff)]
    fn test_invalid_code(#[case] code: u8) {
        assert!(Reliability::from_code(code).is_err());
    }
}
