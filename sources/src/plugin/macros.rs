//! Source Registration Macros
//!
//! `register_source!` hides the `inventory::submit!` boilerplate needed to
//! add a backend to the built-in catalog.
//!
//! # Example
//!
//! ```ignore
//! use tsdr_sources::register_source;
//! use tsdr_sources::plugin::SourceDescriptor;
//!
//! fn airspy() -> SourceDescriptor {
//!     SourceDescriptor::new("Airspy", "TSDRPlugin_Airspy", true)
//!         .with_frequency_bounds(24_000_000, 1_800_000_000)
//! }
//!
//! register_source!("TSDRPlugin_Airspy", airspy);
//! ```

/// Register a source descriptor in the built-in catalog.
///
/// # Arguments
///
/// * `$module_id` - Native module identifier (must match the descriptor)
/// * `$descriptor_fn` - Function returning the `SourceDescriptor`
///
/// The short form declares a descriptor inline:
///
/// ```ignore
/// register_source!("Soapy", "TSDRPlugin_Soapy", false);
/// ```
#[macro_export]
macro_rules! register_source {
    ($module_id:expr, $descriptor_fn:expr) => {
        ::inventory::submit! {
            $crate::plugin::registry::SourceConstructor::new($module_id, $descriptor_fn)
        }
    };
    ($display_name:expr, $module_id:expr, $sample_rate_query:expr) => {
        const _: () = {
            fn descriptor() -> $crate::plugin::descriptor::SourceDescriptor {
                $crate::plugin::descriptor::SourceDescriptor::new(
                    $display_name,
                    $module_id,
                    $sample_rate_query,
                )
            }

            ::inventory::submit! {
                $crate::plugin::registry::SourceConstructor::new($module_id, descriptor)
            }
        };
    };
}
