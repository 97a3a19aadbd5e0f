//! The Binary Opcode Table.
//!
//! Codes are stable across versions. New instructions are appended with
//! unused codes; existing codes are never renumbered.

use datex_types::ast::{BinaryOp, SpecialVar, UnaryOp};

macro_rules! opcodes {
    ($($name:ident = $code:literal,)*) => {
        /// A single DXB instruction code.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        #[allow(non_camel_case_types)]
        pub enum Opcode {
            $($name = $code,)*
        }

        impl Opcode {
            /// Decode an instruction byte. Unknown codes yield `None`.
            pub fn from_byte(byte: u8) -> Option<Self> {
                match byte {
                    $($code => Some(Self::$name),)*
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(Self::$name => stringify!($name),)*
                }
            }
        }
    };
}

opcodes! {
    // control
    END = 0x00,
    CLOSE_AND_STORE = 0xa0,
    SUBSCOPE_START = 0xa1,
    SUBSCOPE_END = 0xa2,
    RETURN = 0xa4,

    // comparison
    EQUAL = 0xa3,
    EQUAL_VALUE = 0xa7,
    NOT_EQUAL_VALUE = 0xa8,
    NOT_EQUAL = 0xdf,
    GREATER = 0xa9,
    LESS = 0xaa,
    GREATER_EQUAL = 0xab,
    LESS_EQUAL = 0xac,
    COUNT = 0xad,

    // variables
    VAR = 0xb0,
    SET_VAR = 0xb1,
    VAR_ACTION = 0xb2,
    INTERNAL_VAR = 0xb3,
    SET_INTERNAL_VAR = 0xb4,
    INTERNAL_VAR_ACTION = 0xb5,

    // pointers
    POINTER = 0xb6,
    SET_POINTER = 0xb7,
    POINTER_ACTION = 0xb8,
    CREATE_POINTER = 0xb9,
    DELETE_POINTER = 0xba,
    SUBSCRIBE = 0xbb,
    UNSUBSCRIBE = 0xbc,
    VALUE = 0xbd,
    ORIGIN = 0xbe,
    SUBSCRIBERS = 0xbf,

    // literals
    STRING = 0xc0,
    INT_8 = 0xc1,
    INT_16 = 0xc2,
    INT_32 = 0xc3,
    INT_64 = 0xc4,
    FLOAT_64 = 0xc5,
    TRUE = 0xc6,
    FALSE = 0xc7,
    NULL = 0xc8,
    VOID = 0xc9,
    BUFFER = 0xca,
    QUANTITY = 0xcc,
    SHORT_STRING = 0xce,

    // endpoints
    PERSON_ALIAS = 0xd0,
    PERSON_ALIAS_WILDCARD = 0xd1,
    INSTITUTION_ALIAS = 0xd2,
    INSTITUTION_ALIAS_WILDCARD = 0xd3,
    ENDPOINT = 0xd6,
    ENDPOINT_WILDCARD = 0xd7,

    // collections
    ARRAY_START = 0xe0,
    ARRAY_END = 0xe1,
    OBJECT_START = 0xe2,
    OBJECT_END = 0xe3,
    TUPLE_START = 0xe4,
    TUPLE_END = 0xe5,

    // logic
    AND = 0xea,
    OR = 0xeb,
    NOT = 0xec,

    // children
    CHILD_GET = 0xf0,
    CHILD_SET = 0xf1,
    CHILD_ACTION = 0xf2,

    THROW_ERROR = 0xf4,
    GET_TYPE = 0xf5,
    REMOTE = 0xf6,
    ADD = 0xf8,
    SUBTRACT = 0xfa,
    MULTIPLY = 0xfb,
    DIVIDE = 0xfc,
    TYPE = 0xff,

    // special variables
    VAR_SENDER = 0x3c,
    VAR_CURRENT = 0x3d,
    VAR_ENCRYPTED = 0x3e,
    VAR_SIGNED = 0x3f,
    VAR_TIMESTAMP = 0x40,
    VAR_THIS = 0x43,
    VAR_IT = 0x47,

    // appended
    INSERT = 0x5c,
    TIMEOUT = 0x5d,
    NEGATE = 0x5e,
}

impl Opcode {
    pub fn for_binary(op: BinaryOp) -> Self {
        match op {
            BinaryOp::Add => Self::ADD,
            BinaryOp::Subtract => Self::SUBTRACT,
            BinaryOp::Multiply => Self::MULTIPLY,
            BinaryOp::Divide => Self::DIVIDE,
            BinaryOp::Equal => Self::EQUAL_VALUE,
            BinaryOp::NotEqual => Self::NOT_EQUAL_VALUE,
            BinaryOp::Identical => Self::EQUAL,
            BinaryOp::NotIdentical => Self::NOT_EQUAL,
            BinaryOp::Less => Self::LESS,
            BinaryOp::Greater => Self::GREATER,
            BinaryOp::LessEqual => Self::LESS_EQUAL,
            BinaryOp::GreaterEqual => Self::GREATER_EQUAL,
            BinaryOp::And => Self::AND,
            BinaryOp::Or => Self::OR,
        }
    }

    pub fn as_binary(self) -> Option<BinaryOp> {
        Some(match self {
            Self::ADD => BinaryOp::Add,
            Self::SUBTRACT => BinaryOp::Subtract,
            Self::MULTIPLY => BinaryOp::Multiply,
            Self::DIVIDE => BinaryOp::Divide,
            Self::EQUAL_VALUE => BinaryOp::Equal,
            Self::NOT_EQUAL_VALUE => BinaryOp::NotEqual,
            Self::EQUAL => BinaryOp::Identical,
            Self::NOT_EQUAL => BinaryOp::NotIdentical,
            Self::LESS => BinaryOp::Less,
            Self::GREATER => BinaryOp::Greater,
            Self::LESS_EQUAL => BinaryOp::LessEqual,
            Self::GREATER_EQUAL => BinaryOp::GreaterEqual,
            Self::AND => BinaryOp::And,
            Self::OR => BinaryOp::Or,
            _ => return None,
        })
    }

    pub fn for_unary(op: UnaryOp) -> Self {
        match op {
            UnaryOp::Negate => Self::NEGATE,
            UnaryOp::Not => Self::NOT,
            UnaryOp::CreatePointer => Self::CREATE_POINTER,
            UnaryOp::DeletePointer => Self::DELETE_POINTER,
            UnaryOp::Subscribe => Self::SUBSCRIBE,
            UnaryOp::Unsubscribe => Self::UNSUBSCRIBE,
            UnaryOp::Value => Self::VALUE,
            UnaryOp::Origin => Self::ORIGIN,
            UnaryOp::Subscribers => Self::SUBSCRIBERS,
            UnaryOp::Count => Self::COUNT,
            UnaryOp::TypeOf => Self::GET_TYPE,
        }
    }

    pub fn as_unary(self) -> Option<UnaryOp> {
        Some(match self {
            Self::NEGATE => UnaryOp::Negate,
            Self::NOT => UnaryOp::Not,
            Self::CREATE_POINTER => UnaryOp::CreatePointer,
            Self::DELETE_POINTER => UnaryOp::DeletePointer,
            Self::SUBSCRIBE => UnaryOp::Subscribe,
            Self::UNSUBSCRIBE => UnaryOp::Unsubscribe,
            Self::VALUE => UnaryOp::Value,
            Self::ORIGIN => UnaryOp::Origin,
            Self::SUBSCRIBERS => UnaryOp::Subscribers,
            Self::COUNT => UnaryOp::Count,
            Self::GET_TYPE => UnaryOp::TypeOf,
            _ => return None,
        })
    }

    pub fn for_special(var: SpecialVar) -> Self {
        match var {
            SpecialVar::Sender => Self::VAR_SENDER,
            SpecialVar::Current => Self::VAR_CURRENT,
            SpecialVar::Timestamp => Self::VAR_TIMESTAMP,
            SpecialVar::Encrypted => Self::VAR_ENCRYPTED,
            SpecialVar::Signed => Self::VAR_SIGNED,
            SpecialVar::This => Self::VAR_THIS,
            SpecialVar::It => Self::VAR_IT,
        }
    }

    pub fn as_special(self) -> Option<SpecialVar> {
        SpecialVar::ALL
            .iter()
            .copied()
            .find(|var| Self::for_special(*var) == self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_through_from_byte() {
        for byte in 0..=u8::MAX {
            if let Some(op) = Opcode::from_byte(byte) {
                assert_eq!(op as u8, byte, "{}", op.name());
            }
        }
    }

    #[test]
    fn stable_codes() {
        assert_eq!(Opcode::ADD as u8, 0xf8);
        assert_eq!(Opcode::CLOSE_AND_STORE as u8, 0xa0);
        assert_eq!(Opcode::REMOTE as u8, 0xf6);
        assert_eq!(Opcode::QUANTITY as u8, 0xcc);
        assert_eq!(Opcode::INSERT as u8, 0x5c);
    }

    #[test]
    fn header_magic_is_not_an_opcode() {
        assert_eq!(Opcode::from_byte(0x01), None);
    }

    #[test]
    fn operator_mappings_are_inverse() {
        use BinaryOp::*;
        for op in [
            Add, Subtract, Multiply, Divide, Equal, NotEqual, Identical, NotIdentical, Less,
            Greater, LessEqual, GreaterEqual, And, Or,
        ] {
            assert_eq!(Opcode::for_binary(op).as_binary(), Some(op));
        }
        for var in SpecialVar::ALL {
            assert_eq!(Opcode::for_special(var).as_special(), Some(var));
        }
        assert_eq!(Opcode::ADD.as_unary(), None);
    }
}
