mod common;

mod write {
    use crate::common::{Eeprom, ImageBuilder, at};
    use chrono::NaiveDateTime;
    use nvmem_cal::error::Error;
    use nvmem_cal::nvmem::CellHeader;
    use nvmem_cal::{CalibrationUnit, Module, RangeTable, RangeUnits};
    use pretty_assertions::assert_eq;

    // Sunday, first day of week 42
    fn now() -> NaiveDateTime {
        at(2026, 10, 18, 14, 5)
    }

    fn table() -> RangeTable {
        RangeTable::new([("V", 0), ("I", 1)]).unwrap()
    }

    fn units() -> RangeUnits {
        let mut units = RangeUnits::new();
        units.insert("V".to_string(), vec![CalibrationUnit::new(1.5, 0.5, 100.0)]);
        units.insert("I".to_string(), vec![CalibrationUnit::new(0.5, 0.25, 1000.0)]);
        units
    }

    fn open(image: Vec<u8>) -> Module<Eeprom> {
        Module::new(Eeprom::new(image, now()), table()).unwrap()
    }

    fn reopen(module: Module<Eeprom>) -> Module<Eeprom> {
        let mut eeprom = module.into_inner();
        eeprom.disable_faults();
        Module::new(eeprom, table()).unwrap()
    }

    #[test]
    fn fit_is_applied_right_away() {
        let image = ImageBuilder::v2(&[(0x100, 0x80), (0x180, 0x80)])
            .units(0, at(2026, 10, 18, 9, 0), &table(), &units())
            .build();
        let mut module = open(image);

        module
            .write_module_calibration("V", &[(10.0, 21.0), (20.0, 41.0)])
            .unwrap();
        assert_eq!(module.calibrate("V", 15.0), Ok(31.0));
        assert_eq!(
            module.calibration_state().units("V"),
            Some(&[CalibrationUnit::new(2.0, 1.0, 100.0)][..])
        );

        // survives a power cycle
        let module = reopen(module);
        assert_eq!(module.calibrate("V", 15.0), Ok(31.0));
    }

    #[test]
    fn same_week_rewrites_latest_cell() {
        let image = ImageBuilder::v2(&[(0x100, 0x80), (0x180, 0x80)])
            .units(0, at(2026, 10, 18, 9, 0), &table(), &units())
            .build();
        let mut module = open(image);

        module
            .write_module_calibration("V", &[(10.0, 21.0), (20.0, 41.0)])
            .unwrap();
        assert_eq!(module.active_calibration_index(), Some(0));
        assert_eq!(module.read_calibration_date(0), Ok(Some(now())));
        assert_eq!(module.read_calibration_date(1), Ok(None));
        // other ranges are carried over within the week
        assert_eq!(module.calibrate("I", 8.0), Ok(4.25));
        assert_eq!(module.calibration_state().version(), Some(0x10));
    }

    #[test]
    fn new_week_starts_new_generation() {
        let image = ImageBuilder::v2(&[(0x100, 0x80), (0x180, 0x80)])
            .units(0, at(2026, 10, 10, 9, 0), &table(), &units())
            .build();
        let mut module = open(image);
        let previous = module.read_calibration_cell(0).unwrap();

        module
            .write_module_calibration("V", &[(10.0, 21.0), (20.0, 41.0)])
            .unwrap();
        assert_eq!(module.active_calibration_index(), Some(1));
        assert_eq!(module.calibrate("V", 15.0), Ok(31.0));
        // everything else starts from identity
        assert_eq!(module.calibrate("I", 8.0), Ok(8.0));
        assert_eq!(
            module.calibration_state().units("I"),
            Some(&[CalibrationUnit::new(1.0, 0.0, 1000.0)][..])
        );

        assert_eq!(module.read_calibration_cell(0), Ok(previous));
        assert_eq!(
            module.layout().cell(1),
            Ok(&CellHeader {
                start_address: 0x180,
                data_size: 0x80
            })
        );
        assert_eq!(module.read_number_supported_calibrations(), 2);
    }

    #[test]
    fn module_grows_to_three_cells() {
        let image = ImageBuilder::v2(&[(0x100, 0x80), (0x180, 0x80)])
            .units(0, at(2026, 9, 20, 9, 0), &table(), &units())
            .units(1, at(2026, 10, 4, 9, 0), &table(), &units())
            .build();
        let mut module = open(image);
        module.platform_mut().operations.clear();

        module
            .write_module_calibration("V", &[(10.0, 21.0), (20.0, 41.0)])
            .unwrap();
        assert_eq!(module.read_number_supported_calibrations(), 3);
        assert_eq!(module.active_calibration_index(), Some(2));
        assert_eq!(
            module.layout().cell(2),
            Ok(&CellHeader {
                start_address: 0x200,
                data_size: 0x80
            })
        );
        assert_eq!(module.layout().user_start_address(), 0x280);
        // payload, header slot 2, then cell count and read-only checksum together
        assert_eq!(
            module.platform().writes(),
            vec![(0x200, 0x80), (0x40 + 2 * 0x25, 0x25), (0x18, 0x28)]
        );

        let module = reopen(module);
        assert_eq!(module.read_number_supported_calibrations(), 3);
        assert_eq!(module.calibrate("V", 15.0), Ok(31.0));
    }

    #[test]
    fn full_module_evicts_oldest_cell() {
        let image = ImageBuilder::v2(&[(0x100, 0x80), (0x180, 0x80), (0x200, 0x80)])
            .units(0, at(2026, 10, 4, 9, 0), &table(), &units())
            .units(1, at(2026, 9, 20, 9, 0), &table(), &units())
            .units(2, at(2026, 10, 11, 9, 0), &table(), &units())
            .build();
        let mut module = open(image);

        module
            .write_module_calibration("V", &[(10.0, 21.0), (20.0, 41.0)])
            .unwrap();
        assert_eq!(module.active_calibration_index(), Some(1));
        assert_eq!(module.read_number_supported_calibrations(), 3);
        assert_eq!(module.layout().cell(1).unwrap().start_address, 0x180);
        assert_eq!(module.read_calibration_date(1), Ok(Some(now())));
    }

    #[test]
    fn fixed_layout_never_grows() {
        let builder = ImageBuilder::v3(2, 0x40);
        let starts = [builder.start(0), builder.start(1)];
        let image = builder
            .units(0, at(2026, 10, 4, 9, 0), &table(), &units())
            .units(1, at(2026, 10, 11, 9, 0), &table(), &units())
            .build();
        let mut module = open(image);

        module
            .write_module_calibration("V", &[(10.0, 21.0), (20.0, 41.0)])
            .unwrap();
        assert_eq!(module.active_calibration_index(), Some(0));
        assert_eq!(module.read_number_supported_calibrations(), 2);
        assert_eq!(module.layout().cell(0).unwrap().start_address, starts[0]);
        assert_eq!(module.layout().cell(1).unwrap().start_address, starts[1]);
        assert_eq!(module.calibrate("V", 15.0), Ok(31.0));
    }

    #[test]
    fn no_header_slot_in_front_of_packed_cells() {
        // cell data directly behind the only header slot
        let image = ImageBuilder::v2(&[(0x65, 0x40)])
            .units(0, at(2026, 10, 4, 9, 0), &table(), &units())
            .build();
        let mut module = open(image);
        module.platform_mut().operations.clear();

        module
            .write_module_calibration("V", &[(10.0, 21.0), (20.0, 41.0)])
            .unwrap();
        assert_eq!(module.read_number_supported_calibrations(), 1);
        assert_eq!(module.active_calibration_index(), Some(0));
        assert_eq!(
            module.layout().cell(0),
            Ok(&CellHeader {
                start_address: 0x65,
                data_size: 0x40
            })
        );
        // the oldest cell is reused, nothing is written over cell data
        assert_eq!(module.platform().writes(), vec![(0x65, 0x40), (0x40, 0x25)]);

        let mut module = reopen(module);
        assert_eq!(module.read_latest_calibration_index(), Ok(0));
        assert_eq!(module.calibrate("V", 15.0), Ok(31.0));
        assert_eq!(module.calibrate("I", 8.0), Ok(8.0));
    }

    #[test]
    fn clock_behind_latest_calibration() {
        let image = ImageBuilder::v2(&[(0x100, 0x80), (0x180, 0x80)])
            .units(0, at(2026, 10, 25, 9, 0), &table(), &units())
            .build();
        let mut module = open(image);
        module.platform_mut().operations.clear();

        assert_eq!(
            module.write_module_calibration("V", &[(10.0, 21.0), (20.0, 41.0)]),
            Err(Error::ClockBehindCalibration)
        );
        assert_eq!(module.platform().writes(), vec![]);
    }

    #[test]
    fn rejected_writes() {
        let image = ImageBuilder::v2(&[(0x100, 0x80), (0x180, 0x80)]).build();
        let mut module = open(image);
        assert_eq!(
            module.write_module_calibration("X", &[(10.0, 21.0), (20.0, 41.0)]),
            Err(Error::UnknownRange)
        );
        assert_eq!(
            module.write_module_calibration("V", &[(10.0, 21.0), (20.0, 41.0)]),
            Err(Error::NoValidCalibrationCell)
        );

        // a new cell behind the last one would not fit
        let image = ImageBuilder::v2(&[(0x780, 0x80)])
            .units(0, at(2026, 10, 4, 9, 0), &table(), &units())
            .build();
        let mut module = open(image);
        module.platform_mut().operations.clear();
        assert_eq!(
            module.write_module_calibration("V", &[(10.0, 21.0), (20.0, 41.0)]),
            Err(Error::CellOverflow)
        );
        assert_eq!(module.platform().writes(), vec![]);
    }

    #[test]
    fn too_few_samples_keep_coefficients() {
        let image = ImageBuilder::v2(&[(0x100, 0x80), (0x180, 0x80)])
            .units(0, at(2026, 10, 18, 9, 0), &table(), &units())
            .build();
        let mut module = open(image);

        module.write_module_calibration("V", &[(10.0, 21.0)]).unwrap();
        assert_eq!(module.calibrate("V", 10.0), Ok(15.5));
        module
            .write_module_calibration("V", &[(10.0, 21.0), (10.0, 22.0)])
            .unwrap();
        assert_eq!(module.calibrate("V", 10.0), Ok(15.5));
    }

    #[test]
    fn interrupted_write_keeps_a_valid_cell() {
        let image = ImageBuilder::v2(&[(0x100, 0x80)])
            .units(0, at(2026, 10, 4, 9, 0), &table(), &units())
            .build();

        for fault in 0.. {
            let mut module = open(image.clone());
            module.platform_mut().fail_after(fault);

            let result =
                module.write_module_calibration("V", &[(10.0, 21.0), (20.0, 41.0)]);
            let module = reopen(module);

            let value = module.calibrate("V", 15.0).unwrap();
            match module.active_calibration_index() {
                Some(0) => assert_eq!(value, 1.5 * 15.0 + 0.5),
                Some(1) => assert_eq!(value, 31.0),
                other => panic!("unexpected cell {other:?} after fault at {fault}"),
            }

            if result.is_ok() {
                assert_eq!(module.active_calibration_index(), Some(1));
                break;
            }
        }
    }
}
