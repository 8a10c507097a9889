/// Defines an enum with an explicit discriminant per variant and derives a
/// `TryFrom<$ty>` implementation mapping unknown discriminants to the given
/// error value.
macro_rules! enum_try_from {
    (
        $(#[$meta:meta])* $vis:vis enum $name:ident {
            $($(#[$vmeta:meta])* $vname:ident = $discriminant:literal),* $(,)?
        },
        $ty:ty,
        $err:expr
    ) => {
        $(#[$meta])*
        $vis enum $name {
            $($(#[$vmeta])* $vname = $discriminant),*
        }

        impl TryFrom<$ty> for $name {
            type Error = $crate::PanicReason;

            fn try_from(value: $ty) -> Result<Self, Self::Error> {
                match value {
                    $($discriminant => Ok(Self::$vname),)*
                    _ => Err($err),
                }
            }
        }
    };
}
