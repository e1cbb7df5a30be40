use crate::{AdqError, ControlUnit, Revision};
use log::info;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct UnitInfo {
    pub unit: u32,
    pub api_revision: i32,
    pub revision: Revision,
    pub serial_number: String,
    pub product_name: String,
    pub n_channels: u32,
    pub bytes_per_sample: u32,
}

impl UnitInfo {
    pub fn query<C: ControlUnit + ?Sized>(cu: &C, unit: u32) -> Result<Self, AdqError> {
        Ok(Self {
            unit,
            api_revision: cu.api_revision(),
            revision: cu.revision(unit)?,
            serial_number: cu.serial_number(unit)?,
            product_name: cu.product_name(unit)?,
            n_channels: cu.nof_channels(unit)?,
            bytes_per_sample: cu.bytes_per_sample(unit)?,
        })
    }

    pub fn report(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for UnitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ADQ #{}", self.unit)?;
        writeln!(f, "API revision:        {}", self.api_revision)?;
        writeln!(
            f,
            "Firmware revision:   {} ({})",
            self.revision.firmware,
            self.revision.describe()
        )?;
        writeln!(f, "Board serial number: {}", self.serial_number)?;
        writeln!(f, "Board product name:  {}", self.product_name)?;
        writeln!(f, "Channels:            {}", self.n_channels)?;
        write!(f, "Bytes per sample:    {}", self.bytes_per_sample)
    }
}

pub fn log_all<C: ControlUnit + ?Sized>(cu: &C, units: u32) -> Result<Vec<UnitInfo>, AdqError> {
    let mut infos = Vec::with_capacity(units as usize);
    for unit in 1..=units {
        let info = UnitInfo::query(cu, unit)?;
        info!("{}", info.report());
        infos.push(info);
    }
    Ok(infos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimulatedControlUnit;

    #[test]
    fn reports_every_unit() {
        let mut cu = SimulatedControlUnit::new(2, 4, 2);
        cu.find_devices();
        let infos = log_all(&cu, 2).unwrap();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[1].serial_number, "SIM00002");
        assert_eq!(infos[0].n_channels, 4);
        let report = infos[0].report();
        assert!(report.contains("Board product name:  ADQ-SIM"));
        assert!(report.contains("SVN Managed, SVN Updated"));
    }

    #[test]
    fn unknown_unit_is_an_error() {
        let mut cu = SimulatedControlUnit::new(1, 2, 2);
        cu.find_devices();
        assert_eq!(log_all(&cu, 2), Err(AdqError::InvalidUnit(2)));
    }
}
