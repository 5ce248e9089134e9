/// Macro building the table of well-known partition type GUIDs.
macro_rules! partition_types {
    (
        $(
            $(#[$docs:meta])*
            ($upcase:ident, $guid:literal, $desc:expr)$(,)*
        )+
    ) => {
        $(
            $(#[$docs])*
            pub const $upcase: Type = Type {
                guid: uuid::uuid!($guid),
                desc: $desc,
            };
        )+

        /// Look up a known partition type by its GUID.
        pub fn lookup(guid: &uuid::Uuid) -> Option<&'static Type> {
            $(
                if *guid == $upcase.guid {
                    return Some(&$upcase);
                }
            )+
            None
        }
    }
}
