//! Compile-time defaults, merged by build.rs from library values and `SF_CONFIG_RS`

include!(concat!(env!("OUT_DIR"), "/sf_merged_config.rs"));
