use crate::messages::HostPort;

/// convenience method for unit test code: create a [HostPort] based on a number, the same number
///  generating the same address and different numbers different addresses
pub fn test_host_port_from_number(number: u16) -> HostPort {
    HostPort::new("127.0.0.1", number)
}
