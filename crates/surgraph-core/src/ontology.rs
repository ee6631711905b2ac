//! Instrument and action vocabularies.
//!
//! Index 0 of [`INSTRUMENT_CLASSES`] is the empty (background) slot.

/// Instrument and context node classes.
pub const INSTRUMENT_CLASSES: [&str; 13] = [
    "",
    "kidney",
    "bipolar_forceps",
    "fenestrated_bipolar",
    "prograsp_forceps",
    "large_needle_driver",
    "vessel_sealer",
    "grasping_retractor",
    "monopolar_curved_scissors",
    "ultrasound_probe",
    "suction",
    "clip_applier",
    "stapler",
];

/// Action classes predicted per node.
pub const ACTION_CLASSES: [&str; 13] = [
    "Idle",
    "Grasping",
    "Retraction",
    "Tissue_Manipulation",
    "Tool_Manipulation",
    "Cutting",
    "Cauterization",
    "Suction",
    "Looping",
    "Suturing",
    "Clipping",
    "Staple",
    "Ultrasound_Sensing",
];

/// Name of an action class.
pub fn action_name(index: usize) -> Option<&'static str> {
    ACTION_CLASSES.get(index).copied()
}

/// Name of an instrument class.
pub fn instrument_name(index: usize) -> Option<&'static str> {
    INSTRUMENT_CLASSES.get(index).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(action_name(0), Some("Idle"));
        assert_eq!(action_name(12), Some("Ultrasound_Sensing"));
        assert_eq!(action_name(13), None);
        assert_eq!(instrument_name(1), Some("kidney"));
    }
}
