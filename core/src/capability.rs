//! Capability policy: collapses the server ceiling, the request preset (or
//! explicit toggles) and the membership role into the effective capability set
//! for one turn. Pure and exhaustively unit-tested; the request path only
//! calls [`derive_capabilities`].

use aidesk_protocol::CapabilitySet;
use aidesk_protocol::SecurityPreset;
use aidesk_protocol::SecurityProfile;
use aidesk_protocol::TeamRole;

/// Explicit toggles from a `custom` preset request. `None` means "not asked".
#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilityToggles {
    pub shell: Option<bool>,
    pub write: Option<bool>,
    pub browser: Option<bool>,
    pub dangerous: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct DerivedCapabilities {
    pub profile: SecurityProfile,
    /// The request explicitly asked for `dangerous` and the server ceiling
    /// denies it. This is the only denial that surfaces as a hard error;
    /// everything else is silently cleared.
    pub explicit_dangerous_denied: bool,
    /// Capabilities that were requested but cleared, with the gate that
    /// cleared them. Reported as `permission` events.
    pub cleared: Vec<(&'static str, &'static str)>,
}

pub fn derive_capabilities(
    ceiling: CapabilitySet,
    preset: SecurityPreset,
    toggles: CapabilityToggles,
    role: TeamRole,
    provider_can_run_unsandboxed: bool,
) -> DerivedCapabilities {
    let requested = match preset {
        SecurityPreset::Safe => CapabilitySet::none(),
        SecurityPreset::Standard => CapabilitySet {
            write: true,
            ..CapabilitySet::none()
        },
        SecurityPreset::Power => CapabilitySet {
            shell: true,
            write: true,
            browser: true,
            dangerous: false,
        },
        SecurityPreset::Custom => CapabilitySet {
            shell: toggles.shell.unwrap_or(false),
            write: toggles.write.unwrap_or(false),
            browser: toggles.browser.unwrap_or(false),
            dangerous: toggles.dangerous.unwrap_or(false),
        },
    };

    let mut effective = requested.intersect(ceiling);
    let mut cleared: Vec<(&'static str, &'static str)> = Vec::new();

    // Every bit in the set guards a dangerous-* risk class, so the role gate
    // applies to all of them.
    if !role.can_enable_dangerous() {
        for (name, on) in [
            ("shell", &mut effective.shell),
            ("write", &mut effective.write),
            ("browser", &mut effective.browser),
            ("dangerous", &mut effective.dangerous),
        ] {
            if *on {
                *on = false;
                cleared.push((name, "requires owner or admin role"));
            }
        }
    }

    // The no-sandbox bit is additionally constrained: custom preset only, and
    // only on a provider that declares it can run unsandboxed.
    if effective.dangerous {
        if preset != SecurityPreset::Custom {
            effective.dangerous = false;
            cleared.push(("dangerous", "requires the custom preset"));
        } else if !provider_can_run_unsandboxed {
            effective.dangerous = false;
            cleared.push(("dangerous", "provider cannot run unsandboxed"));
        }
    }

    DerivedCapabilities {
        profile: SecurityProfile {
            preset,
            requested,
            effective,
        },
        explicit_dangerous_denied: requested.dangerous && !ceiling.dangerous,
        cleared,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn open_ceiling() -> CapabilitySet {
        CapabilitySet {
            shell: true,
            write: true,
            browser: true,
            dangerous: false,
        }
    }

    #[test]
    fn safe_preset_yields_empty_set() {
        let derived = derive_capabilities(
            open_ceiling(),
            SecurityPreset::Safe,
            CapabilityToggles::default(),
            TeamRole::Owner,
            false,
        );
        assert!(derived.profile.effective.is_empty());
        assert!(!derived.explicit_dangerous_denied);
    }

    #[test]
    fn standard_preset_is_write_only() {
        let derived = derive_capabilities(
            open_ceiling(),
            SecurityPreset::Standard,
            CapabilityToggles::default(),
            TeamRole::Admin,
            false,
        );
        assert_eq!(
            derived.profile.effective,
            CapabilitySet {
                write: true,
                ..CapabilitySet::none()
            }
        );
    }

    #[test]
    fn power_preset_respects_ceiling() {
        let ceiling = CapabilitySet {
            shell: false,
            write: true,
            browser: true,
            dangerous: false,
        };
        let derived = derive_capabilities(
            ceiling,
            SecurityPreset::Power,
            CapabilityToggles::default(),
            TeamRole::Owner,
            false,
        );
        assert!(!derived.profile.effective.shell);
        assert!(derived.profile.effective.write);
        assert!(derived.profile.effective.browser);
        // A power preset does not ask for dangerous, so no hard denial.
        assert!(!derived.explicit_dangerous_denied);
    }

    #[test]
    fn member_role_silently_clears_everything_dangerous() {
        let derived = derive_capabilities(
            open_ceiling(),
            SecurityPreset::Power,
            CapabilityToggles::default(),
            TeamRole::Member,
            false,
        );
        assert!(derived.profile.effective.is_empty());
        assert_eq!(derived.cleared.len(), 3);
        // The requested side of the profile still shows what was asked.
        assert!(derived.profile.requested.shell);
    }

    #[test]
    fn effective_is_always_subset_of_ceiling() {
        let presets = [
            SecurityPreset::Safe,
            SecurityPreset::Standard,
            SecurityPreset::Power,
            SecurityPreset::Custom,
        ];
        let roles = [TeamRole::Owner, TeamRole::Admin, TeamRole::Member];
        let toggles = CapabilityToggles {
            shell: Some(true),
            write: Some(true),
            browser: Some(true),
            dangerous: Some(true),
        };
        for ceiling_bits in 0u8..16 {
            let ceiling = CapabilitySet {
                shell: ceiling_bits & 1 != 0,
                write: ceiling_bits & 2 != 0,
                browser: ceiling_bits & 4 != 0,
                dangerous: ceiling_bits & 8 != 0,
            };
            for preset in presets {
                for role in roles {
                    for unsandboxed in [false, true] {
                        let derived =
                            derive_capabilities(ceiling, preset, toggles, role, unsandboxed);
                        let e = derived.profile.effective;
                        assert_eq!(e.intersect(ceiling), e, "effective must be within ceiling");
                        if e.dangerous {
                            assert!(role.can_enable_dangerous());
                            assert_eq!(preset, SecurityPreset::Custom);
                            assert!(unsandboxed);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn dangerous_needs_custom_preset_provider_and_ceiling() {
        let ceiling = CapabilitySet::all();
        let toggles = CapabilityToggles {
            dangerous: Some(true),
            ..Default::default()
        };

        let ok = derive_capabilities(
            ceiling,
            SecurityPreset::Custom,
            toggles,
            TeamRole::Owner,
            true,
        );
        assert!(ok.profile.effective.dangerous);

        let wrong_provider = derive_capabilities(
            ceiling,
            SecurityPreset::Custom,
            toggles,
            TeamRole::Owner,
            false,
        );
        assert!(!wrong_provider.profile.effective.dangerous);
        assert!(!wrong_provider.explicit_dangerous_denied);
    }

    #[test]
    fn explicit_dangerous_against_closed_ceiling_is_a_hard_denial() {
        let derived = derive_capabilities(
            open_ceiling(), // dangerous: false
            SecurityPreset::Custom,
            CapabilityToggles {
                dangerous: Some(true),
                ..Default::default()
            },
            TeamRole::Owner,
            true,
        );
        assert!(derived.explicit_dangerous_denied);
        assert!(!derived.profile.effective.dangerous);
    }
}
