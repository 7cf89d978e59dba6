/*!
The core engine of `portsys`, a source-based C/C++ port package manager.

The modules here follow the dataflow of a package installation: port
metadata is loaded through [`registry`] and [`provider`], the
[`plan`] resolver turns a manifest plus installed state into an ordered
action plan, [`abi`] assigns each planned action a content address,
[`cache`] consults binary providers for prebuilt artifacts, and
[`install`] executes the plan while maintaining the status database.
[`verify`] cross-validates a port tree against its version database for
CI.
*/

pub mod abi;
pub mod cache;
pub mod ci_baseline;
pub mod cmd;
pub mod common;
pub mod core;
pub mod diagnostic;
pub mod git;
pub mod install;
pub mod manifest;
pub mod paths;
pub mod plan;
pub mod provider;
pub mod registry;
pub mod verify;
