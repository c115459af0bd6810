/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint.

- `mcp`: list installed servers, list a server's tools, call a tool

These handlers are intentionally small and wire the library components
together: configuration, the installation store, and the
`call_mcp_server` tool.
*/

pub mod mcp;
