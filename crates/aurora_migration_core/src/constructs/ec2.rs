use std::fmt;
use std::net::Ipv4Addr;

use serde_json::{json, Value};

use crate::assembly::{App, Reference, StackId};
use crate::error::SynthError;
use crate::template::{get_att, get_azs, logical_id, ref_, select, Resource};

const DEFAULT_VPC_CIDR: &str = "10.0.0.0/16";
const DEFAULT_MAX_AZS: usize = 2;
const MAX_AZS: usize = 6;
/// Smallest subnet AWS accepts.
const MAX_SUBNET_PREFIX: u32 = 28;
const ANY_IPV4: &str = "0.0.0.0/0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubnetType {
    Public,
    PrivateWithEgress,
}

impl SubnetType {
    fn group_name(self) -> &'static str {
        match self {
            Self::Public => "Public",
            Self::PrivateWithEgress => "Private",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpcProps {
    pub cidr: String,
    pub max_azs: usize,
    /// `None` places one NAT gateway in every availability zone.
    pub nat_gateways: Option<usize>,
}

impl Default for VpcProps {
    fn default() -> Self {
        Self {
            cidr: DEFAULT_VPC_CIDR.to_string(),
            max_azs: DEFAULT_MAX_AZS,
            nat_gateways: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ipv4Block {
    network: u32,
    prefix: u32,
}

impl Ipv4Block {
    fn parse(cidr: &str) -> Result<Self, SynthError> {
        let invalid = |reason: &str| SynthError::InvalidCidr {
            cidr: cidr.to_string(),
            reason: reason.to_string(),
        };

        let (address, prefix) = cidr
            .split_once('/')
            .ok_or_else(|| invalid("expected address/prefix"))?;
        let address: Ipv4Addr = address
            .parse()
            .map_err(|_| invalid("address is not IPv4"))?;
        let prefix: u32 = prefix
            .parse()
            .map_err(|_| invalid("prefix is not a number"))?;
        if !(16..=MAX_SUBNET_PREFIX).contains(&prefix) {
            return Err(invalid("prefix must be between /16 and /28"));
        }

        let network = u32::from(address);
        if network & host_mask(prefix) != 0 {
            return Err(invalid("address has host bits set"));
        }
        Ok(Self { network, prefix })
    }

    /// Splits the block into `count` equal parts, rounded up to a power of two.
    fn split(self, count: usize, original: &str) -> Result<Vec<Ipv4Block>, SynthError> {
        let extra_bits = count.next_power_of_two().trailing_zeros();
        let prefix = self.prefix + extra_bits;
        if prefix > MAX_SUBNET_PREFIX {
            return Err(SynthError::InvalidCidr {
                cidr: original.to_string(),
                reason: format!("too small to hold {count} subnets"),
            });
        }

        let size = 1u32 << (32 - prefix);
        Ok((0..count as u32)
            .map(|index| Ipv4Block {
                network: self.network + index * size,
                prefix,
            })
            .collect())
    }
}

impl fmt::Display for Ipv4Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", Ipv4Addr::from(self.network), self.prefix)
    }
}

fn host_mask(prefix: u32) -> u32 {
    u32::MAX.checked_shr(prefix).unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subnet {
    pub subnet_type: SubnetType,
    pub az_index: usize,
    pub cidr: String,
    pub subnet: Reference,
    pub route_table: Reference,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Vpc {
    id: String,
    vpc: Reference,
    subnets: Vec<Subnet>,
}

impl Vpc {
    pub fn new(app: &mut App, stack: StackId, id: &str, props: &VpcProps) -> Result<Self, SynthError> {
        if props.max_azs == 0 || props.max_azs > MAX_AZS {
            return Err(SynthError::InvalidVpcConfig(format!(
                "max_azs must be between 1 and {MAX_AZS}, got {}",
                props.max_azs
            )));
        }
        let nat_count = props.nat_gateways.unwrap_or(props.max_azs).min(props.max_azs);
        if nat_count == 0 {
            return Err(SynthError::InvalidVpcConfig(
                "private subnets with egress need at least one NAT gateway".to_string(),
            ));
        }

        let groups = [SubnetType::Public, SubnetType::PrivateWithEgress];
        let blocks =
            Ipv4Block::parse(&props.cidr)?.split(groups.len() * props.max_azs, &props.cidr)?;
        let stack_name = app.stack(stack)?.name().to_string();

        let vpc = app.add_resource(
            stack,
            id,
            Resource::new("AWS::EC2::VPC")
                .property("CidrBlock", props.cidr.as_str())
                .property("EnableDnsHostnames", true)
                .property("EnableDnsSupport", true)
                .property("InstanceTenancy", "default")
                .property("Tags", name_tag(&format!("{stack_name}/{id}"))),
        )?;

        let igw_id = logical_id(&[id, "IGW"]);
        app.add_resource(
            stack,
            &igw_id,
            Resource::new("AWS::EC2::InternetGateway")
                .property("Tags", name_tag(&format!("{stack_name}/{id}"))),
        )?;
        let attachment_id = logical_id(&[id, "VPCGW"]);
        app.add_resource(
            stack,
            &attachment_id,
            Resource::new("AWS::EC2::VPCGatewayAttachment")
                .property("InternetGatewayId", ref_(&igw_id))
                .property("VpcId", ref_(id)),
        )?;

        let mut subnets = Vec::with_capacity(blocks.len());
        let mut nat_gateways = Vec::with_capacity(nat_count);
        let mut blocks = blocks.into_iter();

        for subnet_type in groups {
            for az_index in 0..props.max_azs {
                let block = blocks.next().ok_or_else(|| {
                    SynthError::InvalidVpcConfig("subnet allocation ran out of blocks".to_string())
                })?;
                let ordinal = format!("Subnet{}", az_index + 1);
                let base = logical_id(&[id, subnet_type.group_name(), ordinal.as_str()]);
                let path = format!(
                    "{stack_name}/{id}/{}Subnet{}",
                    subnet_type.group_name(),
                    az_index + 1
                );

                let subnet_id = logical_id(&[base.as_str(), "Subnet"]);
                let subnet = app.add_resource(
                    stack,
                    &subnet_id,
                    Resource::new("AWS::EC2::Subnet")
                        .property("AvailabilityZone", select(az_index, get_azs()))
                        .property("CidrBlock", block.to_string())
                        .property("MapPublicIpOnLaunch", subnet_type == SubnetType::Public)
                        .property("VpcId", ref_(id))
                        .property(
                            "Tags",
                            json!([
                                {"Key": "aws-cdk:subnet-name", "Value": subnet_type.group_name()},
                                {"Key": "aws-cdk:subnet-type", "Value": subnet_type.group_name()},
                                {"Key": "Name", "Value": path.as_str()},
                            ]),
                        ),
                )?;

                let route_table_id = logical_id(&[base.as_str(), "RouteTable"]);
                let route_table = app.add_resource(
                    stack,
                    &route_table_id,
                    Resource::new("AWS::EC2::RouteTable")
                        .property("VpcId", ref_(id))
                        .property("Tags", name_tag(&path)),
                )?;
                let association_id = logical_id(&[base.as_str(), "RouteTableAssociation"]);
                app.add_resource(
                    stack,
                    &association_id,
                    Resource::new("AWS::EC2::SubnetRouteTableAssociation")
                        .property("RouteTableId", ref_(&route_table_id))
                        .property("SubnetId", ref_(&subnet_id)),
                )?;

                let route_id = logical_id(&[base.as_str(), "DefaultRoute"]);
                match subnet_type {
                    SubnetType::Public => {
                        app.add_resource(
                            stack,
                            &route_id,
                            Resource::new("AWS::EC2::Route")
                                .property("DestinationCidrBlock", ANY_IPV4)
                                .property("GatewayId", ref_(&igw_id))
                                .property("RouteTableId", ref_(&route_table_id))
                                .depends_on(attachment_id.as_str()),
                        )?;

                        if az_index < nat_count {
                            let eip_id = logical_id(&[base.as_str(), "EIP"]);
                            app.add_resource(
                                stack,
                                &eip_id,
                                Resource::new("AWS::EC2::EIP")
                                    .property("Domain", "vpc")
                                    .property("Tags", name_tag(&path)),
                            )?;
                            let nat_id = logical_id(&[base.as_str(), "NATGateway"]);
                            app.add_resource(
                                stack,
                                &nat_id,
                                Resource::new("AWS::EC2::NatGateway")
                                    .property("AllocationId", get_att(&eip_id, "AllocationId"))
                                    .property("SubnetId", ref_(&subnet_id))
                                    .property("Tags", name_tag(&path))
                                    .depends_on(route_id.as_str())
                                    .depends_on(association_id.as_str()),
                            )?;
                            nat_gateways.push(nat_id);
                        }
                    }
                    SubnetType::PrivateWithEgress => {
                        let nat_id = nat_gateways
                            .get(az_index)
                            .or_else(|| nat_gateways.first())
                            .ok_or_else(|| {
                                SynthError::InvalidVpcConfig(
                                    "no NAT gateway available for private subnet".to_string(),
                                )
                            })?;
                        app.add_resource(
                            stack,
                            &route_id,
                            Resource::new("AWS::EC2::Route")
                                .property("DestinationCidrBlock", ANY_IPV4)
                                .property("NatGatewayId", ref_(nat_id))
                                .property("RouteTableId", ref_(&route_table_id)),
                        )?;
                    }
                }

                subnets.push(Subnet {
                    subnet_type,
                    az_index,
                    cidr: block.to_string(),
                    subnet,
                    route_table,
                });
            }
        }

        Ok(Self {
            id: id.to_string(),
            vpc,
            subnets,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn vpc_id(&self) -> &Reference {
        &self.vpc
    }

    pub fn subnets(&self) -> &[Subnet] {
        &self.subnets
    }

    pub fn select_subnets(&self, subnet_type: SubnetType) -> Vec<Reference> {
        self.subnets
            .iter()
            .filter(|subnet| subnet.subnet_type == subnet_type)
            .map(|subnet| subnet.subnet.clone())
            .collect()
    }
}

fn name_tag(name: &str) -> Value {
    json!([{ "Key": "Name", "Value": name }])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    All,
}

impl Protocol {
    pub fn as_cfn(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::All => "-1",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Port {
    pub protocol: Protocol,
    pub from_port: u16,
    pub to_port: u16,
}

impl Port {
    pub fn tcp(port: u16) -> Self {
        Self {
            protocol: Protocol::Tcp,
            from_port: port,
            to_port: port,
        }
    }

}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.from_port == self.to_port {
            write!(f, "{} {}", self.protocol.as_cfn(), self.from_port)
        } else {
            write!(
                f,
                "{} {}-{}",
                self.protocol.as_cfn(),
                self.from_port,
                self.to_port
            )
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityGroupProps {
    pub group_name: Option<String>,
    pub description: Option<String>,
    pub allow_all_outbound: bool,
}

impl Default for SecurityGroupProps {
    fn default() -> Self {
        Self {
            group_name: None,
            description: None,
            allow_all_outbound: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SecurityGroup {
    id: String,
    group: Reference,
    ingress_rules: Vec<(Reference, Port)>,
}

impl SecurityGroup {
    pub fn new(
        app: &mut App,
        stack: StackId,
        id: &str,
        vpc: &Vpc,
        props: SecurityGroupProps,
    ) -> Result<Self, SynthError> {
        let stack_name = app.stack(stack)?.name().to_string();
        let vpc_id = app.resolve(stack, vpc.vpc_id())?;
        let description = props
            .description
            .unwrap_or_else(|| format!("{stack_name}/{id}"));

        let mut resource = Resource::new("AWS::EC2::SecurityGroup")
            .property("GroupDescription", description)
            .property("VpcId", vpc_id);
        if let Some(group_name) = props.group_name {
            resource = resource.property("GroupName", group_name);
        }
        if props.allow_all_outbound {
            resource = resource.property(
                "SecurityGroupEgress",
                json!([{
                    "CidrIp": ANY_IPV4,
                    "Description": "Allow all outbound traffic by default",
                    "IpProtocol": Protocol::All.as_cfn(),
                }]),
            );
        }

        let group = app.add_resource(stack, id, resource)?;
        Ok(Self {
            id: id.to_string(),
            group,
            ingress_rules: Vec::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stack(&self) -> StackId {
        self.group.stack()
    }

    pub fn group_id(&self) -> Reference {
        self.group.get_att("GroupId")
    }

    /// Admits traffic from members of `peer` on `port`. The rule is a separate
    /// resource so groups in different stacks can reference each other.
    pub fn add_ingress_rule(
        &mut self,
        app: &mut App,
        peer: &SecurityGroup,
        port: Port,
        description: &str,
    ) -> Result<Reference, SynthError> {
        if self
            .ingress_rules
            .iter()
            .any(|(existing_peer, existing_port)| *existing_peer == peer.group && *existing_port == port)
        {
            return Err(SynthError::DuplicateIngressRule {
                group: self.id.clone(),
                peer: peer.id.clone(),
                port: port.to_string(),
            });
        }

        let stack = self.stack();
        let peer_stack_name = app.stack(peer.stack())?.name().to_string();
        let range = if port.from_port == port.to_port {
            port.from_port.to_string()
        } else {
            format!("{}to{}", port.from_port, port.to_port)
        };
        // TCP keeps the bare port so existing rule ids stay stable.
        let port_label = match port.protocol {
            Protocol::Tcp => range,
            Protocol::All => format!("all{range}"),
        };
        let rule_id = logical_id(&[
            self.id.as_str(),
            "from",
            peer_stack_name.as_str(),
            peer.id.as_str(),
            port_label.as_str(),
        ]);

        let source = app.resolve(stack, &peer.group_id())?;
        let target = app.resolve(stack, &self.group_id())?;
        let rule = app.add_resource(
            stack,
            &rule_id,
            Resource::new("AWS::EC2::SecurityGroupIngress")
                .property("Description", description)
                .property("FromPort", port.from_port)
                .property("GroupId", target)
                .property("IpProtocol", port.protocol.as_cfn())
                .property("SourceSecurityGroupId", source)
                .property("ToPort", port.to_port),
        )?;

        self.ingress_rules.push((peer.group.clone(), port));
        Ok(rule)
    }
}

#[cfg(test)]
mod tests {
    use crate::assembly::Environment;

    use super::*;

    fn network_app() -> (App, StackId) {
        let mut app = App::new();
        let stack = app
            .add_stack("Network", Environment::agnostic(), None)
            .expect("stack should be added");
        (app, stack)
    }

    #[test]
    fn splits_default_cidr_public_first() {
        let (mut app, stack) = network_app();
        let vpc = Vpc::new(&mut app, stack, "DemoVpc", &VpcProps::default()).expect("vpc");

        let cidrs: Vec<&str> = vpc.subnets().iter().map(|s| s.cidr.as_str()).collect();
        assert_eq!(
            cidrs,
            vec!["10.0.0.0/18", "10.0.64.0/18", "10.0.128.0/18", "10.0.192.0/18"]
        );
        assert_eq!(vpc.select_subnets(SubnetType::PrivateWithEgress).len(), 2);
        assert_eq!(
            vpc.select_subnets(SubnetType::PrivateWithEgress)[0].logical_id(),
            "DemoVpcPrivateSubnet1Subnet"
        );
    }

    #[test]
    fn three_azs_round_up_to_eight_blocks() {
        let (mut app, stack) = network_app();
        let props = VpcProps {
            max_azs: 3,
            ..VpcProps::default()
        };
        let vpc = Vpc::new(&mut app, stack, "DemoVpc", &props).expect("vpc");
        assert_eq!(vpc.subnets()[5].cidr, "10.0.160.0/19");
    }

    #[test]
    fn private_routes_use_nat_of_same_az_or_first() {
        let (mut app, stack) = network_app();
        let props = VpcProps {
            nat_gateways: Some(1),
            ..VpcProps::default()
        };
        Vpc::new(&mut app, stack, "DemoVpc", &props).expect("vpc");

        let template = app.stack(stack).expect("stack").template();
        assert_eq!(template.resources_of_type("AWS::EC2::NatGateway").count(), 1);
        let route = &template.resources["DemoVpcPrivateSubnet2DefaultRoute"];
        assert_eq!(
            route.properties["NatGatewayId"],
            json!({"Ref": "DemoVpcPublicSubnet1NATGateway"})
        );
    }

    #[test]
    fn rejects_unusable_cidrs() {
        let (mut app, stack) = network_app();
        let props = VpcProps {
            cidr: "10.0.0.1/16".to_string(),
            ..VpcProps::default()
        };
        assert!(matches!(
            Vpc::new(&mut app, stack, "DemoVpc", &props),
            Err(SynthError::InvalidCidr { .. })
        ));

        let props = VpcProps {
            cidr: "10.0.0.0/27".to_string(),
            ..VpcProps::default()
        };
        assert!(matches!(
            Vpc::new(&mut app, stack, "OtherVpc", &props),
            Err(SynthError::InvalidCidr { .. })
        ));
    }

    #[test]
    fn rejects_az_count_outside_supported_range() {
        let (mut app, stack) = network_app();
        for max_azs in [0, 7] {
            let props = VpcProps {
                max_azs,
                ..VpcProps::default()
            };
            assert!(matches!(
                Vpc::new(&mut app, stack, "DemoVpc", &props),
                Err(SynthError::InvalidVpcConfig(_))
            ));
        }

        let props = VpcProps {
            max_azs: 6,
            ..VpcProps::default()
        };
        let vpc = Vpc::new(&mut app, stack, "WideVpc", &props).expect("six azs");
        assert_eq!(vpc.subnets().len(), 12);
    }

    #[test]
    fn private_subnets_require_a_nat_gateway() {
        let (mut app, stack) = network_app();
        let props = VpcProps {
            nat_gateways: Some(0),
            ..VpcProps::default()
        };
        let error = Vpc::new(&mut app, stack, "DemoVpc", &props).expect_err("no NAT should fail");
        assert!(matches!(error, SynthError::InvalidVpcConfig(_)));
        assert!(app.stack(stack).expect("stack").template().resources.is_empty());
    }

    #[test]
    fn same_port_with_different_protocols_gets_distinct_rules() {
        let (mut app, stack) = network_app();
        let vpc = Vpc::new(&mut app, stack, "DemoVpc", &VpcProps::default()).expect("vpc");
        let mut database =
            SecurityGroup::new(&mut app, stack, "DbGroup", &vpc, SecurityGroupProps::default())
                .expect("group");
        let migration =
            SecurityGroup::new(&mut app, stack, "FnGroup", &vpc, SecurityGroupProps::default())
                .expect("group");

        let tcp = database
            .add_ingress_rule(&mut app, &migration, Port::tcp(5432), "tcp")
            .expect("tcp rule");
        let all = Port {
            protocol: Protocol::All,
            ..Port::tcp(5432)
        };
        let everything = database
            .add_ingress_rule(&mut app, &migration, all, "all traffic")
            .expect("all-traffic rule");

        assert_ne!(tcp.logical_id(), everything.logical_id());
        let template = app.stack(stack).expect("stack").template();
        assert_eq!(template.resources_of_type("AWS::EC2::SecurityGroupIngress").count(), 2);
        assert_eq!(template.resources[everything.logical_id()].properties["IpProtocol"], "-1");
    }

    #[test]
    fn ingress_rule_references_both_groups() {
        let (mut app, stack) = network_app();
        let vpc = Vpc::new(&mut app, stack, "DemoVpc", &VpcProps::default()).expect("vpc");
        let mut database =
            SecurityGroup::new(&mut app, stack, "DbGroup", &vpc, SecurityGroupProps::default())
                .expect("group");
        let migration =
            SecurityGroup::new(&mut app, stack, "FnGroup", &vpc, SecurityGroupProps::default())
                .expect("group");

        let rule = database
            .add_ingress_rule(&mut app, &migration, Port::tcp(5432), "db access")
            .expect("rule");
        assert_eq!(rule.logical_id(), "DbGroupfromNetworkFnGroup5432");

        let template = app.stack(stack).expect("stack").template();
        let properties = &template.resources[rule.logical_id()].properties;
        assert_eq!(properties["IpProtocol"], "tcp");
        assert_eq!(properties["FromPort"], 5432);
        assert_eq!(
            properties["SourceSecurityGroupId"],
            json!({"Fn::GetAtt": ["FnGroup", "GroupId"]})
        );

        let error = database
            .add_ingress_rule(&mut app, &migration, Port::tcp(5432), "again")
            .expect_err("duplicate rule should fail");
        assert!(matches!(error, SynthError::DuplicateIngressRule { .. }));
    }
}
