use serde::Serialize;

mod build_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// Hardware revision reported to the host.
pub const HARDWARE_VERSION: &str = "smu-h7 rev1";

#[derive(Serialize)]
pub struct ApplicationMetadata {
    pub app: &'static str,
    pub hardware_version: &'static str,
    pub firmware_version: &'static str,
    pub rust_version: &'static str,
    pub profile: &'static str,
    pub features: &'static str,
}

impl ApplicationMetadata {
    /// Construct the global metadata.
    ///
    /// # Note
    /// This may only be called once.
    ///
    /// # Returns
    /// A reference to the global metadata.
    pub fn new() -> &'static ApplicationMetadata {
        cortex_m::singleton!(: ApplicationMetadata = ApplicationMetadata {
            app: build_info::PKG_NAME,
            hardware_version: HARDWARE_VERSION,
            firmware_version: build_info::PKG_VERSION,
            rust_version: build_info::RUSTC_VERSION,
            profile: build_info::PROFILE,
            features: build_info::FEATURES_STR,
        })
        .unwrap()
    }
}
