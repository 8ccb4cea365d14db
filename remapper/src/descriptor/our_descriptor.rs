/// Feature report that carries the wheel resolution multipliers
pub const RESOLUTION_MULTIPLIER_REPORT_ID: u8 = 4;
/// Feature report used by the configuration tool
pub const CONFIG_REPORT_ID: u8 = 100;

/// Report descriptor of the device as seen by the host.
///
/// - Report 1: keyboard, 8 modifier bits followed by a bitmap of keys 0x04..=0x73
/// - Report 2: mouse, 8 buttons, absolute X/Y in 0..=32767, relative wheel and AC Pan
/// - Report 3: consumer controls, one bit each
/// - Report 4: feature, resolution multiplier of the wheel (bits 0-1) and AC Pan (bits 2-3)
/// - Report 100: feature, 32 bytes of configuration protocol
#[rustfmt::skip]
pub const OUR_REPORT_DESCRIPTOR: &[u8] = &[
    // Keyboard
    0x05, 0x01,       // Usage Page (Generic Desktop)
    0x09, 0x06,       // Usage (Keyboard)
    0xA1, 0x01,       // Collection (Application)
    0x85, 0x01,       //   Report ID (1)
    0x05, 0x07,       //   Usage Page (Keyboard)
    0x19, 0xE0,       //   Usage Minimum (Left Control)
    0x29, 0xE7,       //   Usage Maximum (Right GUI)
    0x15, 0x00,       //   Logical Minimum (0)
    0x25, 0x01,       //   Logical Maximum (1)
    0x75, 0x01,       //   Report Size (1)
    0x95, 0x08,       //   Report Count (8)
    0x81, 0x02,       //   Input (Data, Variable, Absolute)
    0x19, 0x04,       //   Usage Minimum (A)
    0x29, 0x73,       //   Usage Maximum (F24)
    0x95, 0x70,       //   Report Count (112)
    0x81, 0x02,       //   Input (Data, Variable, Absolute)
    0xC0,             // End Collection

    // Mouse
    0x05, 0x01,       // Usage Page (Generic Desktop)
    0x09, 0x02,       // Usage (Mouse)
    0xA1, 0x01,       // Collection (Application)
    0x85, 0x02,       //   Report ID (2)
    0x09, 0x01,       //   Usage (Pointer)
    0xA1, 0x00,       //   Collection (Physical)
    0x05, 0x09,       //     Usage Page (Button)
    0x19, 0x01,       //     Usage Minimum (1)
    0x29, 0x08,       //     Usage Maximum (8)
    0x15, 0x00,       //     Logical Minimum (0)
    0x25, 0x01,       //     Logical Maximum (1)
    0x75, 0x01,       //     Report Size (1)
    0x95, 0x08,       //     Report Count (8)
    0x81, 0x02,       //     Input (Data, Variable, Absolute)
    0x05, 0x01,       //     Usage Page (Generic Desktop)
    0x09, 0x30,       //     Usage (X)
    0x09, 0x31,       //     Usage (Y)
    0x16, 0x00, 0x00, //     Logical Minimum (0)
    0x26, 0xFF, 0x7F, //     Logical Maximum (32767)
    0x75, 0x10,       //     Report Size (16)
    0x95, 0x02,       //     Report Count (2)
    0x81, 0x02,       //     Input (Data, Variable, Absolute)
    0xA1, 0x02,       //     Collection (Logical)
    0x85, 0x04,       //       Report ID (4)
    0x09, 0x48,       //       Usage (Resolution Multiplier)
    0x15, 0x00,       //       Logical Minimum (0)
    0x25, 0x01,       //       Logical Maximum (1)
    0x35, 0x01,       //       Physical Minimum (1)
    0x45, 0x78,       //       Physical Maximum (120)
    0x75, 0x02,       //       Report Size (2)
    0x95, 0x01,       //       Report Count (1)
    0xB1, 0x02,       //       Feature (Data, Variable, Absolute)
    0x85, 0x02,       //       Report ID (2)
    0x09, 0x38,       //       Usage (Wheel)
    0x16, 0x01, 0x80, //       Logical Minimum (-32767)
    0x26, 0xFF, 0x7F, //       Logical Maximum (32767)
    0x35, 0x00,       //       Physical Minimum (0)
    0x45, 0x00,       //       Physical Maximum (0)
    0x75, 0x10,       //       Report Size (16)
    0x81, 0x06,       //       Input (Data, Variable, Relative)
    0xC0,             //     End Collection
    0xA1, 0x02,       //     Collection (Logical)
    0x85, 0x04,       //       Report ID (4)
    0x09, 0x48,       //       Usage (Resolution Multiplier)
    0x15, 0x00,       //       Logical Minimum (0)
    0x25, 0x01,       //       Logical Maximum (1)
    0x35, 0x01,       //       Physical Minimum (1)
    0x45, 0x78,       //       Physical Maximum (120)
    0x75, 0x02,       //       Report Size (2)
    0xB1, 0x02,       //       Feature (Data, Variable, Absolute)
    0x75, 0x04,       //       Report Size (4)
    0xB1, 0x03,       //       Feature (Constant)
    0x85, 0x02,       //       Report ID (2)
    0x05, 0x0C,       //       Usage Page (Consumer)
    0x0A, 0x38, 0x02, //       Usage (AC Pan)
    0x16, 0x01, 0x80, //       Logical Minimum (-32767)
    0x26, 0xFF, 0x7F, //       Logical Maximum (32767)
    0x35, 0x00,       //       Physical Minimum (0)
    0x45, 0x00,       //       Physical Maximum (0)
    0x75, 0x10,       //       Report Size (16)
    0x81, 0x06,       //       Input (Data, Variable, Relative)
    0xC0,             //     End Collection
    0xC0,             //   End Collection
    0xC0,             // End Collection

    // Consumer controls
    0x05, 0x0C,       // Usage Page (Consumer)
    0x09, 0x01,       // Usage (Consumer Control)
    0xA1, 0x01,       // Collection (Application)
    0x85, 0x03,       //   Report ID (3)
    0x15, 0x00,       //   Logical Minimum (0)
    0x25, 0x01,       //   Logical Maximum (1)
    0x75, 0x01,       //   Report Size (1)
    0x95, 0x08,       //   Report Count (8)
    0x09, 0xE2,       //   Usage (Mute)
    0x09, 0xE9,       //   Usage (Volume Increment)
    0x09, 0xEA,       //   Usage (Volume Decrement)
    0x09, 0xCD,       //   Usage (Play/Pause)
    0x09, 0xB5,       //   Usage (Scan Next Track)
    0x09, 0xB6,       //   Usage (Scan Previous Track)
    0x09, 0xB7,       //   Usage (Stop)
    0x0A, 0x83, 0x01, //   Usage (AL Consumer Control Configuration)
    0x81, 0x02,       //   Input (Data, Variable, Absolute)
    0xC0,             // End Collection

    // Configuration
    0x06, 0x00, 0xFF, // Usage Page (Vendor Defined 0xFF00)
    0x09, 0x20,       // Usage (0x20)
    0xA1, 0x01,       // Collection (Application)
    0x85, 0x64,       //   Report ID (100)
    0x09, 0x20,       //   Usage (0x20)
    0x15, 0x00,       //   Logical Minimum (0)
    0x26, 0xFF, 0x00, //   Logical Maximum (255)
    0x75, 0x08,       //   Report Size (8)
    0x95, 0x20,       //   Report Count (32)
    0xB1, 0x02,       //   Feature (Data, Variable, Absolute)
    0xC0,             // End Collection
];
