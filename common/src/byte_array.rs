use serde_with::{hex::Hex, serde_as};
use std::fmt::{Display, Formatter};
use std::ops::Deref;

macro_rules! declare_byte_array_type {
    ($name:ident, $size:expr) => {
        /// $name
        #[serde_as]
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            serde::Serialize,
            serde::Deserialize,
        )]
        pub struct $name(#[serde_as(as = "Hex")] pub [u8; $size]);

        impl Default for $name {
            fn default() -> Self {
                Self([0u8; $size])
            }
        }

        impl From<[u8; $size]> for $name {
            fn from(bytes: [u8; $size]) -> Self {
                Self(bytes)
            }
        }

        impl TryFrom<Vec<u8>> for $name {
            type Error = Vec<u8>;
            fn try_from(vec: Vec<u8>) -> Result<Self, Self::Error> {
                Ok($name(vec.try_into()?))
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = std::array::TryFromSliceError;
            fn try_from(arr: &[u8]) -> Result<Self, Self::Error> {
                Ok($name(arr.try_into()?))
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl Deref for $name {
            type Target = [u8; $size];
            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", hex::encode(self.0))
            }
        }
    };
}

declare_byte_array_type!(Bytes32, 32);

declare_byte_array_type!(Signature, 64);

declare_byte_array_type!(PublicKey, 32);

declare_byte_array_type!(Address, 26);

declare_byte_array_type!(TxId, 32);
