// Raspberry Pi 40-pin header: physical (board) numbering -> BCM GPIO lines
//
// Actuators are configured with board numbers, the same numbering the rig's
// wiring diagrams use.

/// (board pin, BCM line) for every header pin that carries a GPIO
const BOARD_TO_BCM: [(u8, u8); 28] = [
    (3, 2),
    (5, 3),
    (7, 4),
    (8, 14),
    (10, 15),
    (11, 17),
    (12, 18),
    (13, 27),
    (15, 22),
    (16, 23),
    (18, 24),
    (19, 10),
    (21, 9),
    (22, 25),
    (23, 11),
    (24, 8),
    (26, 7),
    (27, 0),
    (28, 1),
    (29, 5),
    (31, 6),
    (32, 12),
    (33, 13),
    (35, 19),
    (36, 16),
    (37, 26),
    (38, 20),
    (40, 21),
];

/// Board pins that may drive actuators.
///
/// Excludes the I2C1 pair (3, 5: fixed pull-ups), the serial console (8, 10)
/// and the HAT ID EEPROM lines (27, 28).
pub const SAFE_BOARD_PINS: [u8; 22] = [
    7, 11, 12, 13, 15, 16, 18, 19, 21, 22, 23, 24, 26, 29, 31, 32, 33, 35, 36, 37, 38, 40,
];

/// BCM line behind a board pin, if the pin is a GPIO at all
pub fn board_to_bcm(board_pin: u8) -> Option<u8> {
    BOARD_TO_BCM
        .iter()
        .find(|&&(board, _)| board == board_pin)
        .map(|&(_, bcm)| bcm)
}

pub fn is_safe_board_pin(board_pin: u8) -> bool {
    SAFE_BOARD_PINS.contains(&board_pin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rig_pins_map_to_bcm() {
        assert_eq!(board_to_bcm(11), Some(17));
        assert_eq!(board_to_bcm(32), Some(12));
        assert_eq!(board_to_bcm(38), Some(20));
        assert_eq!(board_to_bcm(40), Some(21));
    }

    #[test]
    fn test_power_and_ground_pins_have_no_line() {
        for pin in [1, 2, 4, 6, 9, 14, 17, 20, 25, 30, 34, 39] {
            assert_eq!(board_to_bcm(pin), None, "pin {} is not a GPIO", pin);
        }
    }

    #[test]
    fn test_safe_pins_are_all_gpio() {
        for &pin in &SAFE_BOARD_PINS {
            assert!(board_to_bcm(pin).is_some(), "safe pin {} has no BCM line", pin);
        }
        assert!(!is_safe_board_pin(3));
        assert!(!is_safe_board_pin(27));
        assert!(is_safe_board_pin(36));
    }
}
