//! Property-based tests for configuration module

use super::*;
use proptest::prelude::*;

prop_compose! {
    fn valid_cache_config()(
        enabled in any::<bool>(),
        expire_ticks in 1u64..=MAX_EXPIRE_TICKS,
        max_per_size in 1usize..256,
    ) -> FboCacheConfig {
        FboCacheConfig {
            enabled,
            expire_ticks,
            max_per_size,
        }
    }
}

prop_compose! {
    fn any_screen_config()(
        inverted_y in any::<bool>(),
        use_screen in any::<bool>(),
        use_picture_screen in any::<bool>(),
    ) -> ScreenConfig {
        ScreenConfig {
            inverted_y,
            use_screen,
            use_picture_screen,
        }
    }
}

proptest! {
    #[test]
    fn valid_configs_pass_validation(
        fbo_cache in valid_cache_config(),
        screen in any_screen_config(),
        debug_level in 0u32..10,
    ) {
        let config = AccelConfig { debug_level, fbo_cache, screen };
        prop_assert!(config.validate().is_ok());
    }

    #[test]
    fn flags_mirror_screen_switches(screen in any_screen_config()) {
        let flags = screen.init_flags();
        prop_assert_eq!(flags.contains(InitFlags::INVERTED_Y_AXIS), screen.inverted_y);
        prop_assert_eq!(flags.contains(InitFlags::USE_SCREEN), screen.use_screen);
        prop_assert_eq!(flags.contains(InitFlags::USE_PICTURE_SCREEN), screen.use_picture_screen);
    }

    #[test]
    fn debug_level_parses_any_decimal(level in 0u32..100_000, suffix in "[a-z ]{0,4}") {
        prop_assert_eq!(parse_debug_level(&format!("{}{}", level, suffix)), level);
    }
}
