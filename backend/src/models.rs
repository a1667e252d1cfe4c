pub use shared::{
    ApiError, CameraCommand, Coordinate, Destination, FollowCameraRequest, GpxResponse,
    Instruction, ManeuverKind, MarkerKind, NavigationPhase, NavigationView, PositionFix,
    RouteResult, StartNavigationRequest,
};
