/// Declares a fieldless enum that mirrors a native `int` enumeration.
///
/// Generates the enum itself (`repr(i32)`, with the native discriminants),
/// `as_raw`, a `TryFrom<i32>` that rejects unknown values with
/// [`ParseError::UnknownValue`](crate::ParseError::UnknownValue), and a
/// `Display` impl using the given labels.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident = $value:literal => $label:literal,
            )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[repr(i32)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                $variant = $value,
            )+
        }

        impl $name {
            /// Native integer value of this variant.
            #[must_use]
            pub const fn as_raw(self) -> i32 {
                self as i32
            }
        }

        impl TryFrom<i32> for $name {
            type Error = $crate::error::ParseError;

            fn try_from(value: i32) -> Result<Self, Self::Error> {
                match value {
                    $( $value => Ok($name::$variant), )+
                    _ => Err($crate::error::ParseError::UnknownValue {
                        kind: stringify!($name),
                        value,
                    }),
                }
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                match self {
                    $( $name::$variant => f.write_str($label), )+
                }
            }
        }
    };
}
