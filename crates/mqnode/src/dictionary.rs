/// Access modes declared for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Readable only.
    Read,
    /// Writable only.
    Write,
    /// Readable and writable.
    ReadWrite,
    /// Executable only.
    Execute,
}

impl Access {
    /// Checks whether the resource can be read.
    #[must_use]
    pub const fn is_readable(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    /// Checks whether the resource can be written.
    #[must_use]
    pub const fn is_writable(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }

    /// Checks whether the resource can be executed.
    #[must_use]
    pub const fn is_executable(self) -> bool {
        matches!(self, Self::Execute)
    }
}

/// A well-known object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectSpec {
    /// Object identifier.
    pub id: u16,
    /// Object alias.
    pub name: &'static str,
}

/// A well-known resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceSpec {
    /// Resource identifier.
    pub id: u16,
    /// Resource alias.
    pub name: &'static str,
    /// Resource access mode.
    pub access: Access,
}

const fn object(id: u16, name: &'static str) -> ObjectSpec {
    ObjectSpec { id, name }
}

const fn resource(id: u16, name: &'static str, access: Access) -> ResourceSpec {
    ResourceSpec { id, name, access }
}

use Access::{Execute as E, Read as R, ReadWrite as RW};

/// All well-known objects.
pub const ALL_OBJECTS: &[ObjectSpec] = &[
    object(0, "lwm2mSecurity"),
    object(1, "lwm2mServer"),
    object(2, "accessControl"),
    object(3, "device"),
    object(4, "connMonitor"),
    object(5, "firmware"),
    object(6, "location"),
    object(7, "connStatistics"),
    object(3200, "dIn"),
    object(3201, "dOut"),
    object(3202, "aIn"),
    object(3203, "aOut"),
    object(3300, "generic"),
    object(3301, "illuminance"),
    object(3302, "presence"),
    object(3303, "temperature"),
    object(3304, "humidity"),
    object(3305, "pwrMea"),
    object(3306, "actuation"),
    object(3308, "setPoint"),
    object(3310, "loadCtrl"),
    object(3311, "lightCtrl"),
    object(3312, "pwrCtrl"),
    object(3313, "accelerometer"),
    object(3314, "magnetometer"),
    object(3315, "barometer"),
];

const SERVER_RESOURCES: &[ResourceSpec] = &[
    resource(0, "shortServerId", R),
    resource(1, "lifetime", RW),
    resource(2, "defaultMinPeriod", RW),
    resource(3, "defaultMaxPeriod", RW),
    resource(4, "disable", E),
    resource(5, "disableTimeout", RW),
    resource(6, "notificationStoring", RW),
    resource(7, "binding", RW),
    resource(8, "regUpdateTrigger", E),
];

const DEVICE_RESOURCES: &[ResourceSpec] = &[
    resource(0, "manuf", R),
    resource(1, "model", R),
    resource(2, "serial", R),
    resource(3, "firmwareVer", R),
    resource(4, "reboot", E),
    resource(5, "factoryReset", E),
    resource(6, "availPwrSrc", R),
    resource(7, "pwrSrcVoltage", R),
    resource(8, "pwrSrcCurrent", R),
    resource(9, "battLevel", R),
    resource(10, "memFree", R),
    resource(11, "errCode", R),
    resource(12, "resetErrCode", E),
    resource(13, "currTime", RW),
    resource(14, "UTCOffset", RW),
    resource(15, "timezone", RW),
    resource(16, "supportedBinding", R),
    resource(17, "devType", R),
    resource(18, "hwVer", R),
    resource(19, "swVer", R),
];

const CONN_MONITOR_RESOURCES: &[ResourceSpec] = &[
    resource(0, "nwkBearer", R),
    resource(1, "availNwkBearer", R),
    resource(2, "radioSS", R),
    resource(3, "linkQuality", R),
    resource(4, "ipAddrs", R),
    resource(5, "routeIpAddrs", R),
    resource(6, "linkUtil", R),
    resource(7, "APN", R),
    resource(8, "cellId", R),
    resource(9, "SMNC", R),
    resource(10, "SMCC", R),
];

const LOCATION_RESOURCES: &[ResourceSpec] = &[
    resource(0, "lat", R),
    resource(1, "lon", R),
    resource(2, "alt", R),
    resource(3, "uncertainty", R),
    resource(4, "velocity", R),
    resource(5, "timestamp", R),
];

// IPSO resource identifiers are shared by every IPSO object.
const IPSO_RESOURCES: &[ResourceSpec] = &[
    resource(5500, "dInState", R),
    resource(5501, "counter", R),
    resource(5502, "dInPolarity", RW),
    resource(5503, "debouncePeriod", RW),
    resource(5504, "edgeSelection", RW),
    resource(5505, "counterReset", E),
    resource(5550, "dOutState", RW),
    resource(5551, "dOutPolarity", RW),
    resource(5600, "aInCurrValue", R),
    resource(5601, "minMeasuredValue", R),
    resource(5602, "maxMeasuredValue", R),
    resource(5603, "minRangeValue", R),
    resource(5604, "maxRangeValue", R),
    resource(5605, "resetMinMaxMeasuredValues", E),
    resource(5650, "aOutCurrValue", RW),
    resource(5700, "sensorValue", R),
    resource(5701, "units", R),
    resource(5750, "appType", RW),
    resource(5850, "onOff", RW),
    resource(5851, "dimmer", RW),
    resource(5900, "setPointValue", RW),
];

fn object_resources(oid: u16) -> &'static [ResourceSpec] {
    match oid {
        1 => SERVER_RESOURCES,
        3 => DEVICE_RESOURCES,
        4 => CONN_MONITOR_RESOURCES,
        6 => LOCATION_RESOURCES,
        _ => &[],
    }
}

/// Returns the well-known object with the given alias.
#[must_use]
pub fn object_by_name(name: &str) -> Option<&'static ObjectSpec> {
    ALL_OBJECTS.iter().find(|spec| spec.name == name)
}

/// Returns the well-known object with the given identifier.
#[must_use]
pub fn object_by_id(oid: u16) -> Option<&'static ObjectSpec> {
    ALL_OBJECTS.iter().find(|spec| spec.id == oid)
}

/// Returns the well-known resource of an object with the given alias.
///
/// Object-specific resources are searched first, then the IPSO ones.
#[must_use]
pub fn resource_by_name(oid: u16, name: &str) -> Option<&'static ResourceSpec> {
    object_resources(oid)
        .iter()
        .chain(IPSO_RESOURCES)
        .find(|spec| spec.name == name)
}

/// Returns the well-known resource of an object with the given identifier.
#[must_use]
pub fn resource_by_id(oid: u16, rid: u16) -> Option<&'static ResourceSpec> {
    object_resources(oid)
        .iter()
        .chain(IPSO_RESOURCES)
        .find(|spec| spec.id == rid)
}

/// Returns the access mode of a resource.
///
/// Resources missing from the dictionary are readable and writable.
#[must_use]
pub fn access(oid: u16, rid: u16) -> Access {
    resource_by_id(oid, rid).map_or(Access::ReadWrite, |spec| spec.access)
}
