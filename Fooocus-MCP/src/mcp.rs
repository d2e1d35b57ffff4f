//! MCP adapter: exposes [`ToolSurface`] over the rmcp server runtime.

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, ServerCapabilities, ServerInfo};
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler};
use std::sync::Arc;

use crate::backend::FooocusBackend;
use crate::tools::{
    BrowseImagesArgs, GenerateImageArgs, GenerateVariationArgs, ManageBackendArgs, ToolResponse,
    ToolSurface,
};

const INSTRUCTIONS: &str = "Generates images with a local Fooocus-API backend. \
Use generate_image for new images, browse_images to find earlier results and \
generate_variation to vary one of them by its index. list_styles shows style \
names and aspect-ratio presets. The backend is started on demand; use \
manage_backend and server_status to inspect or control it.";

impl From<ToolResponse> for CallToolResult {
    fn from(resp: ToolResponse) -> Self {
        let content = vec![Content::text(resp.text)];
        if resp.is_error {
            CallToolResult::error(content)
        } else {
            CallToolResult::success(content)
        }
    }
}

#[derive(Clone)]
pub struct FooocusMcp {
    tools: Arc<ToolSurface<FooocusBackend>>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl FooocusMcp {
    pub fn new(tools: Arc<ToolSurface<FooocusBackend>>) -> Self {
        Self {
            tools,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "Generate images from a text prompt. Waits for the job to finish and returns the saved file paths and seeds."
    )]
    async fn generate_image(
        &self,
        Parameters(args): Parameters<GenerateImageArgs>,
    ) -> Result<CallToolResult, McpError> {
        Ok(self.tools.generate_image(args).await.into())
    }

    #[tool(
        description = "Create variations of a previously generated image, picked by its 1-based index in browse_images (newest first). Prompt and style default to the source image's."
    )]
    async fn generate_variation(
        &self,
        Parameters(args): Parameters<GenerateVariationArgs>,
    ) -> Result<CallToolResult, McpError> {
        Ok(self.tools.generate_variation(args).await.into())
    }

    #[tool(description = "List generated images with their prompts and seeds.")]
    async fn browse_images(
        &self,
        Parameters(args): Parameters<BrowseImagesArgs>,
    ) -> Result<CallToolResult, McpError> {
        Ok(self.tools.browse_images(args).await.into())
    }

    #[tool(description = "List available styles, performance presets and aspect-ratio presets.")]
    async fn list_styles(&self) -> Result<CallToolResult, McpError> {
        Ok(self.tools.list_styles().into())
    }

    #[tool(description = "Start, stop, restart or check the Fooocus-API backend.")]
    async fn manage_backend(
        &self,
        Parameters(args): Parameters<ManageBackendArgs>,
    ) -> Result<CallToolResult, McpError> {
        Ok(self.tools.manage_backend(args).await.into())
    }

    #[tool(description = "Show backend reachability, active jobs and the output directory.")]
    async fn server_status(&self) -> Result<CallToolResult, McpError> {
        Ok(self.tools.server_status().await.into())
    }
}

#[tool_handler]
impl ServerHandler for FooocusMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(INSTRUCTIONS.into()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
